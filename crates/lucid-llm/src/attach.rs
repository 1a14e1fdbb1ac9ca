//! Best-effort registration of a callback handler with a host object graph.

use std::sync::Arc;

use tracing::{debug, info};

use crate::callback::CallbackHandler;

/// How deep `attach_to_host` descends below the root.
pub const MAX_ATTACH_DEPTH: usize = 4;

/// A named child reachable from a host.
pub struct HostChild<'a> {
    pub name: String,
    pub host: &'a mut dyn CallbackHost,
}

/// Anything a framework builds that may carry its own callback list
/// (a chain, an agent, a model wrapper) and may own further such objects.
pub trait CallbackHost: Send {
    fn host_name(&self) -> &str;

    /// This object's registered handlers, if it keeps any.
    fn callbacks_mut(&mut self) -> Option<&mut Vec<Arc<dyn CallbackHandler>>> {
        None
    }

    fn children_mut(&mut self) -> Vec<HostChild<'_>> {
        Vec::new()
    }
}

/// Walk `root` and its descendants (bounded depth, skipping members whose
/// name starts with `_`) and append `handler` to every callback list that
/// does not already hold a handler with the same name. Returns the number
/// of lists that were extended.
pub fn attach_to_host(root: &mut dyn CallbackHost, handler: Arc<dyn CallbackHandler>) -> usize {
    let attached = visit(root, &handler, 0);
    info!(host = root.host_name(), attached, "callback handler attached");
    attached
}

fn visit(host: &mut dyn CallbackHost, handler: &Arc<dyn CallbackHandler>, depth: usize) -> usize {
    let mut attached = 0;
    if let Some(callbacks) = host.callbacks_mut() {
        if callbacks.iter().any(|h| h.name() == handler.name()) {
            debug!(depth, "handler already registered");
        } else {
            callbacks.push(Arc::clone(handler));
            attached += 1;
        }
    }
    if depth >= MAX_ATTACH_DEPTH {
        return attached;
    }
    for child in host.children_mut() {
        if child.name.starts_with('_') {
            continue;
        }
        attached += visit(child.host, handler, depth + 1);
    }
    attached
}
