//! Test data builders for creating test objects

use changeflow::message::{Document, Message, Op};
use changeflow::pipeline::{Adaptor, Node};
use serde_json::json;

/// `n` documents `{"_id": i, "seq": i}`
pub fn documents(n: i64) -> Vec<Document> {
    (0..n)
        .filter_map(|i| json!({"_id": i, "seq": i}).as_object().cloned())
        .collect()
}

/// Insert message for `_id = id`, stamped `1000 + id`
pub fn message(id: i64) -> Message {
    Message::new(Op::Insert, "test.items", json!({"_id": id}).as_object().cloned())
        .with_timestamp(1000 + id)
}

/// Builder for small test trees
pub struct TreeBuilder {
    root: Node,
}

impl TreeBuilder {
    pub fn source(name: &str, adaptor: impl Adaptor + 'static) -> Self {
        Self {
            root: Node::new(name, adaptor),
        }
    }

    /// Add a direct child of the root
    pub fn child(mut self, name: &str, adaptor: impl Adaptor + 'static) -> Self {
        self.root.add_child(Node::new(name, adaptor));
        self
    }

    /// Add a prebuilt subtree under the root
    pub fn subtree(mut self, node: Node) -> Self {
        self.root.add_child(node);
        self
    }

    pub fn build(self) -> Node {
        self.root
    }
}
