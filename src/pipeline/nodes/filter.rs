//! Filter: namespace and operation filtering transform.
//!
//! With no allowed namespaces or ops configured, every message passes
//! through (passthrough mode). Otherwise only messages whose namespace is in
//! `namespaces` (when non-empty) and whose op is in `ops` (when non-empty)
//! pass; `invert` flips the decision. Filtered-out messages still count as
//! processed so this node's checkpoint keeps advancing.

use crate::message::{Message, Op};
use crate::pipeline::error::PipelineResult;
use crate::pipeline::node::Adaptor;
use crate::pipeline::pipe::Pipe;
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct Filter {
    namespaces: HashSet<String>,
    ops: HashSet<Op>,
    invert: bool,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespaces.insert(namespace.into());
        self
    }

    pub fn allow_op(mut self, op: Op) -> Self {
        self.ops.insert(op);
        self
    }

    /// Block the configured set instead of allowing it.
    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    pub fn is_passthrough(&self) -> bool {
        self.namespaces.is_empty() && self.ops.is_empty()
    }

    /// Whether `msg` is forwarded to children.
    pub fn matches(&self, msg: &Message) -> bool {
        if self.is_passthrough() {
            return true;
        }
        let ns_ok = self.namespaces.is_empty() || self.namespaces.contains(&msg.namespace);
        let op_ok = self.ops.is_empty() || self.ops.contains(&msg.op);
        (ns_ok && op_ok) != self.invert
    }
}

impl Adaptor for Filter {
    fn kind(&self) -> &str {
        "filter"
    }

    fn start(&self, pipe: &Pipe) -> PipelineResult<()> {
        pipe.listen(|msg| {
            if self.matches(&msg) {
                Ok(Some(msg))
            } else {
                pipe.record(&msg);
                Ok(None)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(op: Op, ns: &str) -> Message {
        Message::new(op, ns, None)
    }

    #[test]
    fn test_passthrough() {
        let filter = Filter::new();
        assert!(filter.is_passthrough());
        assert!(filter.matches(&msg(Op::Delete, "any.thing")));
    }

    #[test]
    fn test_namespace_and_op() {
        let filter = Filter::new().allow_namespace("shop.orders").allow_op(Op::Insert);
        assert!(filter.matches(&msg(Op::Insert, "shop.orders")));
        assert!(!filter.matches(&msg(Op::Update, "shop.orders")));
        assert!(!filter.matches(&msg(Op::Insert, "shop.users")));
    }

    #[test]
    fn test_inverted() {
        let filter = Filter::new().allow_op(Op::Delete).inverted();
        assert!(filter.matches(&msg(Op::Insert, "a")));
        assert!(!filter.matches(&msg(Op::Delete, "a")));
    }
}
