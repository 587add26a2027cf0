// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Mutable processing graph.
//!
//! The [`Graph`] keeps a model of all [`ProcessingNode`]s and their links and
//! forwards every validated change to a [`Backend`] which does the actual
//! media processing.

mod backend;
mod element;
mod node;
mod pad;
mod param;

use std::{collections::BTreeMap, fmt::Write, time::Duration};

pub use backend::*;
pub use element::*;
pub use node::*;
pub use pad::*;
pub use param::*;

use crate::{Error, Feed, Result, Sink};

/// Read only view onto the nodes of a graph.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    nodes: BTreeMap<String, ProcessingNode>,
}

impl Topology {
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&ProcessingNode> {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ProcessingNode> {
        self.nodes.values()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Walk upstream from the sink pad `pad` and return the source node feeding it.
    ///
    /// Returns `None` if the pad is unlinked or the chain does not end in a
    /// source, e.g. because it passes through a mux.
    #[must_use]
    pub fn upstream_source(&self, pad: &PadRef) -> Option<&ProcessingNode> {
        let mut peer = self.node(&pad.node)?.pad(&pad.pad)?.peer()?.clone();
        // bounded by the number of nodes to survive cycles
        for _ in 0..=self.nodes.len() {
            let node = self.node(&peer.node)?;
            match node.kind() {
                NodeKind::Source => return Some(node),
                NodeKind::Transform => {
                    peer = node
                        .pads_in(PadDirection::Sink)
                        .next()?
                        .peer()?
                        .clone();
                }
                NodeKind::Mux | NodeKind::Sink => return None,
            }
        }
        None
    }

    /// Names of all nodes upstream of `node` including itself, closest first.
    #[must_use]
    pub fn upstream_chain(&self, node: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = self.node(node);
        while let Some(n) = current {
            if chain.iter().any(|c| c == n.name()) {
                break;
            }
            chain.push(n.name().to_owned());
            current = match n.kind() {
                NodeKind::Transform | NodeKind::Sink => n
                    .pads_in(PadDirection::Sink)
                    .next()
                    .and_then(Pad::peer)
                    .and_then(|peer| self.node(&peer.node)),
                NodeKind::Source | NodeKind::Mux => None,
            };
        }
        chain
    }

    /// Names of all sink nodes reached downstream from `pad`.
    #[must_use]
    pub fn downstream_sinks(&self, pad: &PadRef) -> Vec<String> {
        let mut sinks = Vec::new();
        let mut pending = vec![pad.clone()];
        let mut visited = Vec::new();
        while let Some(pad) = pending.pop() {
            if visited.contains(&pad) {
                continue;
            }
            let Some(peer) = self
                .node(&pad.node)
                .and_then(|node| node.pad(&pad.pad))
                .and_then(Pad::peer)
            else {
                visited.push(pad);
                continue;
            };
            visited.push(pad);
            let Some(node) = self.node(&peer.node) else {
                continue;
            };
            if node.kind() == NodeKind::Sink {
                if !sinks.iter().any(|s| s == node.name()) {
                    sinks.push(node.name().to_owned());
                }
                continue;
            }
            pending.extend(
                node.pads_in(PadDirection::Src)
                    .map(|src| PadRef::new(node.name(), src.name())),
            );
        }
        sinks
    }

    /// Render the graph in Graphviz DOT format.
    #[must_use]
    pub fn dot(&self, title: &str) -> String {
        let mut dot = String::new();
        let _ = writeln!(dot, "digraph \"{title}\" {{");
        let _ = writeln!(dot, "  rankdir=LR;");
        let _ = writeln!(dot, "  node [shape=record];");
        for node in self.nodes.values() {
            let sinks = node
                .pads_in(PadDirection::Sink)
                .map(|pad| format!("<{0}> {0}", pad.name()))
                .collect::<Vec<_>>()
                .join("|");
            let srcs = node
                .pads_in(PadDirection::Src)
                .map(|pad| format!("<{0}> {0}", pad.name()))
                .collect::<Vec<_>>()
                .join("|");
            let params = node
                .params()
                .iter()
                .map(|(name, value)| format!("{name}={}", value.to_string().replace('"', "'")))
                .collect::<Vec<_>>()
                .join("\\n");
            let _ = writeln!(
                dot,
                "  \"{name}\" [label=\"{{{{{sinks}}}|{name}\\n({factory})\\n{params}|{{{srcs}}}}}\"];",
                name = node.name(),
                factory = node.element().factory_name(),
            );
        }
        for node in self.nodes.values() {
            for pad in node.pads_in(PadDirection::Src) {
                if let Some(peer) = pad.peer() {
                    let _ = writeln!(
                        dot,
                        "  \"{}\":\"{}\" -> \"{}\":\"{}\" [label=\"{}\"];",
                        node.name(),
                        pad.name(),
                        peer.node,
                        peer.pad,
                        pad.caps()
                    );
                }
            }
        }
        dot.push_str("}\n");
        dot
    }

    fn get(&self, name: &str) -> Result<&ProcessingNode> {
        self.nodes
            .get(name)
            .ok_or_else(|| Error::UnknownNode(name.to_owned()))
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut ProcessingNode> {
        self.nodes
            .get_mut(name)
            .ok_or_else(|| Error::UnknownNode(name.to_owned()))
    }

    /// Take `src` out of the map to borrow it mutably alongside `sink`.
    fn with_pair<T>(
        &mut self,
        src: &str,
        sink: &str,
        f: impl FnOnce(&mut ProcessingNode, &mut ProcessingNode) -> Result<T>,
    ) -> Result<T> {
        if src == sink {
            return Err(Error::Link {
                src: src.to_owned(),
                sink: sink.to_owned(),
                reason: "a node cannot be linked to itself".to_owned(),
            });
        }
        self.get(sink)?;
        let mut src_node = self
            .nodes
            .remove(src)
            .ok_or_else(|| Error::UnknownNode(src.to_owned()))?;
        let result = match self.nodes.get_mut(sink) {
            Some(sink_node) => f(&mut src_node, sink_node),
            None => Err(Error::UnknownNode(sink.to_owned())),
        };
        self.nodes.insert(src.to_owned(), src_node);
        result
    }
}

/// Processing graph which can be changed while it is running.
pub struct Graph {
    topology: Topology,
    backend: Box<dyn Backend>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("topology", &self.topology)
            .finish_non_exhaustive()
    }
}

fn backend_error(operation: &'static str, target: impl ToString, error: &anyhow::Error) -> Error {
    Error::Backend {
        operation,
        target: target.to_string(),
        reason: format!("{error:#}"),
    }
}

impl Graph {
    #[must_use]
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self {
            topology: Topology::default(),
            backend,
        }
    }

    #[must_use]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    #[must_use]
    pub fn node(&self, name: &str) -> Option<&ProcessingNode> {
        self.topology.node(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.topology.contains(name)
    }

    /// Register a node without linking it.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken or the backend cannot create the node.
    pub fn add(&mut self, node: ProcessingNode) -> Result<()> {
        if self.topology.contains(node.name()) {
            return Err(Error::DuplicateNode(node.name().to_owned()));
        }
        self.backend
            .create(&node)
            .map_err(|error| Error::Construction {
                node: node.name().to_owned(),
                reason: format!("{error:#}"),
            })?;
        trace!("added node '{}' ({})", node.name(), node.element());
        self.topology.nodes.insert(node.name().to_owned(), node);
        Ok(())
    }

    /// Remove a node after unlinking all of its pads.
    ///
    /// Requested peer pads which become unlinked are released.
    ///
    /// # Errors
    ///
    /// Fails if the node does not exist or the backend refuses the removal.
    pub fn remove(&mut self, name: &str) -> Result<ProcessingNode> {
        let peers = self
            .topology
            .get(name)?
            .pads()
            .filter_map(|pad| pad.peer().map(|peer| (pad.name().to_owned(), peer.clone())))
            .collect::<Vec<_>>();

        for (pad, peer) in peers {
            self.unlink(&PadRef::new(name, pad))?;
            let requested = self
                .topology
                .node(&peer.node)
                .and_then(|node| node.pad(&peer.pad))
                .is_some_and(|pad| pad.presence() == Presence::Request);
            if requested {
                self.release_pad(&peer.node, &peer.pad)?;
            }
        }

        self.backend
            .remove(name)
            .map_err(|error| backend_error("remove", name, &error))?;
        trace!("removed node '{name}'");
        self.topology
            .nodes
            .remove(name)
            .ok_or_else(|| Error::UnknownNode(name.to_owned()))
    }

    /// Link a free src pad of `src` to a compatible sink pad of `sink`.
    ///
    /// Requests a sink pad if `sink` only offers request pads. If the backend
    /// refuses the link the model is rolled back.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Link`] naming the endpoints.
    pub fn link(&mut self, src: &str, sink: &str) -> Result<LinkedPads> {
        let linked = self
            .topology
            .with_pair(src, sink, |src, sink| src.link(sink))?;
        if let Err(error) = self.link_backend(&linked) {
            self.rollback(&linked);
            return Err(error);
        }
        debug!("linked '{}' with '{}'", linked.src, linked.sink);
        Ok(linked)
    }

    fn link_backend(&mut self, linked: &LinkedPads) -> Result<()> {
        let backend_link_error = |error: anyhow::Error| Error::Link {
            src: linked.src.to_string(),
            sink: linked.sink.to_string(),
            reason: format!("{error:#}"),
        };
        if linked.requested {
            let template = self
                .topology
                .get(&linked.sink.node)?
                .pad(&linked.sink.pad)
                .map(Pad::template)
                .unwrap_or_default();
            self.backend
                .request_pad(&linked.sink.node, template, &linked.sink.pad)
                .map_err(backend_link_error)?;
        }
        self.backend
            .link(&linked.src, &linked.sink)
            .map_err(backend_link_error)
    }

    fn rollback(&mut self, linked: &LinkedPads) {
        if let Some(node) = self.topology.nodes.get_mut(&linked.src.node) {
            node.clear_peer(&linked.src.pad);
        }
        if let Some(node) = self.topology.nodes.get_mut(&linked.sink.node) {
            node.clear_peer(&linked.sink.pad);
            if linked.requested {
                let _ = node.release_pad(&linked.sink.pad);
                if let Err(error) = self
                    .backend
                    .release_pad(&linked.sink.node, &linked.sink.pad)
                {
                    debug!("unable to release pad '{}': {error:#}", linked.sink);
                }
            }
        }
    }

    /// Link the named pads.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Link`] naming the endpoints.
    pub fn link_pads(&mut self, src: &PadRef, sink: &PadRef) -> Result<()> {
        self.topology.with_pair(&src.node, &sink.node, |a, b| {
            a.link_pads(&src.pad, b, &sink.pad)
        })?;
        let linked = LinkedPads {
            src: src.clone(),
            sink: sink.clone(),
            requested: false,
        };
        if let Err(error) = self.link_backend(&linked) {
            self.rollback(&linked);
            return Err(error);
        }
        debug!("linked '{src}' with '{sink}'");
        Ok(())
    }

    /// Remove the link of the given pad, if there is one.
    ///
    /// # Errors
    ///
    /// Fails if the node does not exist or the backend refuses.
    pub fn unlink(&mut self, pad: &PadRef) -> Result<()> {
        let Some(peer) = self.topology.get_mut(&pad.node)?.clear_peer(&pad.pad) else {
            return Ok(());
        };
        if let Some(node) = self.topology.nodes.get_mut(&peer.node) {
            node.clear_peer(&peer.pad);
        }
        let is_src = self
            .topology
            .get(&pad.node)?
            .pad(&pad.pad)
            .is_some_and(|p| p.direction() == PadDirection::Src);
        let (src, sink) = if is_src { (pad, &peer) } else { (&peer, pad) };
        self.backend
            .unlink(src, sink)
            .map_err(|error| backend_error("unlink", src, &error))
    }

    /// Request a pad from the template `template` of `node`.
    ///
    /// # Errors
    ///
    /// Fails if the node has no such template.
    pub fn request_pad(&mut self, node: &str, template: &str) -> Result<String> {
        let pad = self.topology.get_mut(node)?.request_pad(template)?;
        if let Err(error) = self.backend.request_pad(node, template, &pad) {
            let _ = self.topology.get_mut(node)?.release_pad(&pad);
            return Err(Error::Pad {
                node: node.to_owned(),
                pad,
                reason: format!("{error:#}"),
            });
        }
        Ok(pad)
    }

    /// Release a requested pad after unlinking it.
    ///
    /// # Errors
    ///
    /// Fails if the pad does not exist or is no request pad.
    pub fn release_pad(&mut self, node: &str, pad: &str) -> Result<()> {
        self.unlink(&PadRef::new(node, pad))?;
        self.topology.get_mut(node)?.release_pad(pad)?;
        self.backend
            .release_pad(node, pad)
            .map_err(|error| backend_error("release pad", PadRef::new(node, pad), &error))
    }

    /// Set a parameter of `node`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidParameter`] if the element rejects it.
    pub fn set_parameter(
        &mut self,
        node: &str,
        name: &str,
        value: impl Into<ParamValue>,
    ) -> Result<()> {
        let value = self
            .topology
            .get_mut(node)?
            .store_parameter(name, value.into())?;
        self.backend
            .set_parameter(&Target::Node(node.to_owned()), name, &value)
            .map_err(|error| Error::InvalidParameter {
                target: node.to_owned(),
                name: name.to_owned(),
                reason: format!("{error:#}"),
            })
    }

    /// Set a parameter of a pad.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidParameter`] if the pad rejects it.
    pub fn set_pad_parameter(
        &mut self,
        pad: &PadRef,
        name: &str,
        value: impl Into<ParamValue>,
    ) -> Result<()> {
        let value = self
            .topology
            .get_mut(&pad.node)?
            .store_pad_parameter(&pad.pad, name, value.into())?;
        self.backend
            .set_parameter(&Target::Pad(pad.clone()), name, &value)
            .map_err(|error| Error::InvalidParameter {
                target: pad.to_string(),
                name: name.to_owned(),
                reason: format!("{error:#}"),
            })
    }

    /// Feed the source node `node` from a track.
    ///
    /// # Errors
    ///
    /// Fails if `node` is not a source.
    pub fn attach_feed(&mut self, node: &str, feed: Feed) -> Result<()> {
        if self.topology.get(node)?.kind() != NodeKind::Source {
            return Err(Error::InvalidParameter {
                target: node.to_owned(),
                name: "feed".to_owned(),
                reason: "only source nodes can be fed".to_owned(),
            });
        }
        self.backend
            .attach_feed(node, feed)
            .map_err(|error| backend_error("attach feed to", node, &error))
    }

    /// Deliver the output reaching the sink node `node` to `sink`.
    ///
    /// # Errors
    ///
    /// Fails if `node` is not a sink.
    pub fn attach_sink(&mut self, node: &str, sink: Box<dyn Sink>) -> Result<()> {
        if self.topology.get(node)?.kind() != NodeKind::Sink {
            return Err(Error::InvalidParameter {
                target: node.to_owned(),
                name: "sink".to_owned(),
                reason: "only sink nodes can deliver output".to_owned(),
            });
        }
        self.backend
            .attach_sink(node, sink)
            .map_err(|error| backend_error("attach sink to", node, &error))
    }

    /// Apply all pending changes at once.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot apply the batch.
    pub fn commit(&mut self) -> Result<()> {
        self.backend
            .commit(&self.topology)
            .map_err(|error| backend_error("commit", "graph", &error))
    }

    /// Start processing.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot start.
    pub fn activate(&mut self, feed_ended: FeedEnded) -> Result<()> {
        self.backend
            .commit(&self.topology)
            .and_then(|()| self.backend.activate(feed_ended))
            .map_err(|error| backend_error("activate", "graph", &error))
    }

    /// Let end-of-stream flow through all branches.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot drain.
    pub fn drain(&mut self) -> Result<()> {
        self.backend
            .drain()
            .map_err(|error| backend_error("drain", "graph", &error))
    }

    #[must_use]
    pub fn drained(&self) -> DrainSignal {
        self.backend.drained()
    }

    /// Stop processing, waiting at most `grace`.
    ///
    /// # Errors
    ///
    /// Fails if the backend could not shut down cleanly.
    pub fn teardown(mut self, grace: Duration) -> Result<()> {
        self.backend
            .teardown(grace)
            .map_err(|error| backend_error("tear down", "graph", &error))
    }

    /// Render the graph in Graphviz DOT format.
    #[must_use]
    pub fn dot(&self, title: &str) -> String {
        self.topology.dot(title)
    }
}
