//! Processing tree vertices.
//!
//! A [`Node`] pairs one [`Adaptor`] with its ordered children. Ownership
//! only flows downwards: a node owns its children and there are no parent
//! pointers. A node's path (`root/child/grandchild`) is computed during
//! initialization by passing the ancestry down and is cached in its [`Pipe`].

use crate::config::ChannelPolicy;
use crate::events::Endpoint;
use crate::message::Message;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::pipe::Pipe;
use crossbeam_channel::{Receiver, Sender};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

/// Context handed to [`Adaptor::init`].
#[derive(Debug, Clone, Copy)]
pub struct InitContext<'a> {
    /// Path of the node being initialized.
    pub path: &'a str,
    /// Interval at which the pipeline harvests metrics.
    pub metrics_interval: Duration,
}

/// A source, transform, or sink plugged into the tree.
///
/// `start` blocks until the adaptor reaches a terminal state: a source when
/// its input is exhausted or it is stopped, a transform or sink when its
/// parent closes the data channel or it is stopped. `stop` must not block;
/// it only asks the adaptor to wind down. The node already stops the
/// adaptor's [`Pipe`], which interrupts [`Pipe::recv`] and blocking sends.
pub trait Adaptor: Send + Sync {
    /// Adaptor type name, reported in endpoint descriptors.
    fn kind(&self) -> &str;

    /// Called once before the pipeline starts.
    fn init(&mut self, _ctx: &InitContext<'_>) -> PipelineResult<()> {
        Ok(())
    }

    /// Run until terminal.
    fn start(&self, pipe: &Pipe) -> PipelineResult<()>;

    /// Ask the adaptor to stop.
    fn stop(&self) {}
}

/// Wiring shared by every node during initialization.
pub(crate) struct TreeContext {
    pub metrics_interval: Duration,
    pub data_policy: ChannelPolicy,
    pub errors: Sender<PipelineError>,
}

/// One vertex of the processing tree.
pub struct Node {
    name: String,
    adaptor: Box<dyn Adaptor>,
    children: Vec<Node>,
    pipe: Option<Pipe>,
}

impl Node {
    pub fn new(name: impl Into<String>, adaptor: impl Adaptor + 'static) -> Self {
        Self::from_boxed(name, Box::new(adaptor))
    }

    pub fn from_boxed(name: impl Into<String>, adaptor: Box<dyn Adaptor>) -> Self {
        Self {
            name: name.into(),
            adaptor,
            children: Vec::new(),
            pipe: None,
        }
    }

    /// Append a child, builder style.
    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    /// Append a child.
    pub fn add_child(&mut self, child: Node) -> &mut Self {
        self.children.push(child);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        self.adaptor.kind()
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// The node's pipe, once the tree has been initialized.
    pub fn pipe(&self) -> Option<&Pipe> {
        self.pipe.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.pipe.is_some()
    }

    /// Path from the root. Before initialization this is just the name.
    pub fn path(&self) -> &str {
        self.pipe.as_ref().map_or(&self.name, |p| p.path())
    }

    /// Number of nodes in this subtree.
    pub fn len(&self) -> usize {
        let mut count = 0;
        self.visit_breadth_first(|_| count += 1);
        count
    }

    /// Always false: a tree has at least its root.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Endpoint descriptors of every node in this subtree, level order.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints = Vec::new();
        self.visit_breadth_first(|node| {
            endpoints.push(Endpoint {
                name: node.name.clone(),
                kind: node.kind().to_string(),
            });
        });
        endpoints
    }

    /// Apply `visit` to every node of this subtree exactly once, in level
    /// order, children in declared order.
    pub fn visit_breadth_first<'a, F>(&'a self, mut visit: F)
    where
        F: FnMut(&'a Node),
    {
        let mut frontier: VecDeque<&'a Node> = VecDeque::new();
        frontier.push_back(self);
        while let Some(node) = frontier.pop_front() {
            visit(node);
            frontier.extend(node.children.iter());
        }
    }

    /// Initialize this subtree as the root of a tree.
    pub(crate) fn init(&mut self, ctx: &TreeContext) -> PipelineResult<()> {
        self.init_at(None, None, ctx)
    }

    fn init_at(
        &mut self,
        parent_path: Option<&str>,
        input: Option<Receiver<Message>>,
        ctx: &TreeContext,
    ) -> PipelineResult<()> {
        let path = match parent_path {
            Some(parent) => format!("{}/{}", parent, self.name),
            None => self.name.clone(),
        };

        if self.name.is_empty() || self.name.contains('/') {
            return Err(PipelineError::NodeInit {
                path,
                message: format!("invalid node name {:?}", self.name),
            });
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.children.iter().find(|c| !seen.insert(c.name.as_str())) {
            return Err(PipelineError::NodeInit {
                path,
                message: format!("duplicate child name {:?}", dup.name),
            });
        }

        let init_ctx = InitContext {
            path: &path,
            metrics_interval: ctx.metrics_interval,
        };
        self.adaptor.init(&init_ctx).map_err(|e| match e {
            e @ PipelineError::NodeInit { .. } => e,
            other => PipelineError::NodeInit {
                path: path.clone(),
                message: other.to_string(),
            },
        })?;
        tracing::debug!("Initialized node {} ({})", path, self.adaptor.kind());

        let pipe = Pipe::new(path, input, ctx.data_policy, ctx.errors.clone());
        for child in &mut self.children {
            let rx = pipe.open_output();
            child.init_at(Some(pipe.path()), Some(rx), ctx)?;
        }
        self.pipe = Some(pipe);
        Ok(())
    }

    /// Run this subtree until it terminates.
    ///
    /// Each child runs on its own scoped thread; this node's adaptor runs on
    /// the calling thread. When the adaptor returns or panics, the incoming
    /// channel is closed so the parent cannot block on it, and outgoing
    /// channels are closed so children drain and finish. Child failures go to the error
    /// channel as soon as they happen; only this node's own failure is
    /// returned. Returns once every descendant has finished.
    pub fn start(&self) -> PipelineResult<()> {
        let pipe = self.pipe.as_ref().ok_or_else(|| {
            PipelineError::node(&self.name, "node started before initialization")
        })?;

        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.children.len());
            for child in &self.children {
                let spawned = std::thread::Builder::new()
                    .name(format!("node:{}", child.path()))
                    .spawn_scoped(scope, move || {
                        // Report right away; the parent may be blocked on a send to this child.
                        if let Err(e) = child.start() {
                            pipe.report(e);
                        }
                    });
                match spawned {
                    Ok(handle) => handles.push((child.path(), handle)),
                    Err(e) => pipe.report(PipelineError::Io(e)),
                }
            }

            let result = panic::catch_unwind(AssertUnwindSafe(|| self.adaptor.start(pipe)))
                .unwrap_or_else(|_| Err(PipelineError::Panicked(pipe.path().to_string())));
            pipe.close_input();
            pipe.close_outputs();
            if let Err(e) = &result {
                tracing::debug!("Node {} finished with error: {}", pipe.path(), e);
            }

            for (path, handle) in handles {
                if handle.join().is_err() {
                    pipe.report(PipelineError::Panicked(path.to_string()));
                }
            }
            result
        })
    }

    /// Stop every node of this subtree: the pipe's stop signal first, then
    /// the adaptor.
    pub fn stop(&self) {
        self.visit_breadth_first(|node| {
            if let Some(pipe) = &node.pipe {
                pipe.stop();
            }
            node.adaptor.stop();
        });
    }

    fn fmt_depth(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(
            f,
            "{:indent$}- {}({})",
            "",
            self.name,
            self.adaptor.kind(),
            indent = depth * 2
        )?;
        for child in &self.children {
            child.fmt_depth(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_depth(f, 0)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("path", &self.path())
            .field("kind", &self.adaptor.kind())
            .field("children", &self.children)
            .finish()
    }
}
