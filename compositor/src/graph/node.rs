// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use std::collections::{BTreeMap, HashMap};

use super::{
    Element, NodeKind, Pad, PadDirection, PadRef, PadTemplate, ParamSpec, ParamValue, Presence,
};
use crate::{Error, Result};

/// A node of the processing graph.
///
/// Wraps an [`Element`] together with its parameters and pads. Nodes are
/// plain models, the [`Graph`](super::Graph) forwards every change to its
/// backend.
#[derive(Debug, Clone)]
pub struct ProcessingNode {
    name: String,
    element: Element,
    params: BTreeMap<String, ParamValue>,
    pads: BTreeMap<String, Pad>,
    // next free index per request template
    requested: HashMap<&'static str, usize>,
}

/// Pads selected by [`ProcessingNode::link`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedPads {
    pub src: PadRef,
    pub sink: PadRef,
    /// `true` if the sink pad was requested for this link
    pub requested: bool,
}

impl ProcessingNode {
    /// Create a node with all of its always pads.
    #[must_use]
    pub fn new(element: Element, name: impl Into<String>) -> Self {
        let pads = element
            .templates()
            .iter()
            .filter(|template| template.presence == Presence::Always)
            .map(|template| (template.name.to_owned(), Pad::new(template.name.to_owned(), template)))
            .collect();
        Self {
            name: name.into(),
            element,
            params: BTreeMap::new(),
            pads,
            requested: HashMap::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn element(&self) -> Element {
        self.element
    }

    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.element.kind()
    }

    #[must_use]
    pub fn params(&self) -> &BTreeMap<String, ParamValue> {
        &self.params
    }

    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    pub fn pads(&self) -> impl Iterator<Item = &Pad> {
        self.pads.values()
    }

    #[must_use]
    pub fn pad(&self, name: &str) -> Option<&Pad> {
        self.pads.get(name)
    }

    /// Pads of the given direction.
    pub fn pads_in(&self, direction: PadDirection) -> impl Iterator<Item = &Pad> {
        self.pads
            .values()
            .filter(move |pad| pad.direction() == direction)
    }

    /// Set a parameter after checking name and type against the element.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidParameter`] if the element does not know the
    /// parameter or the value cannot be converted into the declared type.
    pub fn set_parameter(&mut self, name: &str, value: impl Into<ParamValue>) -> Result<()> {
        self.store_parameter(name, value.into()).map(drop)
    }

    /// Like [`set_parameter`](Self::set_parameter) but returns the stored value.
    pub(crate) fn store_parameter(&mut self, name: &str, value: ParamValue) -> Result<ParamValue> {
        let value = check(&self.name, self.element.params(), name, value)?;
        self.params.insert(name.to_owned(), value.clone());
        Ok(value)
    }

    /// Builder flavour of [`set_parameter`](Self::set_parameter).
    ///
    /// # Errors
    ///
    /// See [`set_parameter`](Self::set_parameter).
    pub fn with_parameter(mut self, name: &str, value: impl Into<ParamValue>) -> Result<Self> {
        self.set_parameter(name, value)?;
        Ok(self)
    }

    /// Set a parameter of one of the node's pads.
    ///
    /// # Errors
    ///
    /// Fails if the pad does not exist or the parameter is rejected.
    pub fn set_pad_parameter(
        &mut self,
        pad: &str,
        name: &str,
        value: impl Into<ParamValue>,
    ) -> Result<()> {
        self.store_pad_parameter(pad, name, value.into()).map(drop)
    }

    pub(crate) fn store_pad_parameter(
        &mut self,
        pad: &str,
        name: &str,
        value: ParamValue,
    ) -> Result<ParamValue> {
        let target = format!("{}.{pad}", self.name);
        let value = check(&target, self.element.pad_params(), name, value)?;
        self.pads
            .get_mut(pad)
            .ok_or_else(|| Error::Pad {
                node: self.name.clone(),
                pad: pad.to_owned(),
                reason: "no such pad".to_owned(),
            })?
            .set_param(name, value.clone());
        Ok(value)
    }

    /// Create a new pad from a request template like `sink_%u`.
    ///
    /// Returns the name of the new pad.
    ///
    /// # Errors
    ///
    /// Fails if the element has no request template with the given name.
    pub fn request_pad(&mut self, template: &str) -> Result<String> {
        let template = self
            .element
            .templates()
            .into_iter()
            .find(|t| t.presence == Presence::Request && t.name == template)
            .ok_or_else(|| self.pad_error(template, "no such request pad template"))?;
        Ok(self.request_from(&template))
    }

    fn request_from(&mut self, template: &PadTemplate) -> String {
        let index = self.requested.entry(template.name).or_default();
        let name = template.pad_name(*index);
        *index += 1;
        self.pads
            .insert(name.clone(), Pad::new(name.clone(), template));
        trace!("requested pad '{}.{name}'", self.name);
        name
    }

    /// Remove a requested pad.
    ///
    /// # Errors
    ///
    /// Fails if the pad does not exist, is an always pad or is still linked.
    pub fn release_pad(&mut self, pad: &str) -> Result<Pad> {
        let existing = self
            .pads
            .get(pad)
            .ok_or_else(|| self.pad_error(pad, "no such pad"))?;
        if existing.presence() != Presence::Request {
            return Err(self.pad_error(pad, "only requested pads can be released"));
        }
        if existing.is_linked() {
            return Err(self.pad_error(pad, "pad is still linked"));
        }
        self.pads
            .remove(pad)
            .ok_or_else(|| self.pad_error(pad, "no such pad"))
    }

    /// Link a free src pad of this node to a compatible sink pad of `other`.
    ///
    /// Takes the first unlinked always sink pad with compatible caps, or
    /// requests a new one from a compatible request template.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Link`] naming the endpoints if no free src pad exists
    /// or nothing on `other` accepts its caps.
    pub fn link(&mut self, other: &mut ProcessingNode) -> Result<LinkedPads> {
        let src = self
            .pads_in(PadDirection::Src)
            .find(|pad| !pad.is_linked())
            .ok_or_else(|| Error::Link {
                src: self.name.clone(),
                sink: other.name.clone(),
                reason: "no unlinked src pad".to_owned(),
            })?;
        let src_name = src.name().to_owned();
        let caps = src.caps();

        let existing = other
            .pads_in(PadDirection::Sink)
            .find(|pad| {
                pad.presence() == Presence::Always
                    && !pad.is_linked()
                    && caps.is_compatible(&pad.caps())
            })
            .map(|pad| pad.name().to_owned());

        let (sink_name, requested) = match existing {
            Some(name) => (name, false),
            None => {
                let template = other
                    .element
                    .templates()
                    .into_iter()
                    .find(|t| {
                        t.direction == PadDirection::Sink
                            && t.presence == Presence::Request
                            && caps.is_compatible(&t.caps)
                    })
                    .ok_or_else(|| Error::Link {
                        src: format!("{}.{src_name}", self.name),
                        sink: other.name.clone(),
                        reason: format!("no free sink pad accepts '{caps}'"),
                    })?;
                (other.request_from(&template), true)
            }
        };

        self.connect(&src_name, other, &sink_name)?;
        Ok(LinkedPads {
            src: PadRef::new(&self.name, src_name),
            sink: PadRef::new(&other.name, sink_name),
            requested,
        })
    }

    /// Link the named pads of this node and `other`.
    ///
    /// # Errors
    ///
    /// Fails if a pad is missing, already linked, has the wrong direction or the
    /// caps are incompatible.
    pub fn link_pads(&mut self, src: &str, other: &mut ProcessingNode, sink: &str) -> Result<()> {
        self.connect(src, other, sink)
    }

    fn connect(&mut self, src: &str, other: &mut ProcessingNode, sink: &str) -> Result<()> {
        let link_error = |reason: String| Error::Link {
            src: format!("{}.{src}", self.name),
            sink: format!("{}.{sink}", other.name),
            reason,
        };

        let src_pad = self
            .pads
            .get(src)
            .ok_or_else(|| link_error("no such src pad".to_owned()))?;
        let sink_pad = other
            .pads
            .get(sink)
            .ok_or_else(|| link_error("no such sink pad".to_owned()))?;

        if src_pad.direction() != PadDirection::Src || sink_pad.direction() != PadDirection::Sink {
            return Err(link_error("pad directions do not match".to_owned()));
        }
        if let Some(peer) = src_pad.peer().or(sink_pad.peer()) {
            return Err(link_error(format!("pad is already linked to '{peer}'")));
        }
        if !src_pad.caps().is_compatible(&sink_pad.caps()) {
            return Err(link_error(format!(
                "'{}' is not compatible with '{}'",
                src_pad.caps(),
                sink_pad.caps()
            )));
        }

        let src_ref = PadRef::new(&self.name, src);
        let sink_ref = PadRef::new(&other.name, sink);
        if let Some(pad) = self.pads.get_mut(src) {
            pad.set_peer(Some(sink_ref));
        }
        if let Some(pad) = other.pads.get_mut(sink) {
            pad.set_peer(Some(src_ref));
        }
        Ok(())
    }

    /// Forget the link of the given pad and return the former peer.
    pub(crate) fn clear_peer(&mut self, pad: &str) -> Option<PadRef> {
        self.pads.get_mut(pad).and_then(|pad| pad.set_peer(None))
    }

    fn pad_error(&self, pad: &str, reason: &str) -> Error {
        Error::Pad {
            node: self.name.clone(),
            pad: pad.to_owned(),
            reason: reason.to_owned(),
        }
    }
}

fn check(target: &str, specs: &[ParamSpec], name: &str, value: ParamValue) -> Result<ParamValue> {
    let invalid = |reason: String| Error::InvalidParameter {
        target: target.to_owned(),
        name: name.to_owned(),
        reason,
    };
    let spec = specs
        .iter()
        .find(|spec| spec.name == name)
        .ok_or_else(|| invalid("unknown parameter".to_owned()))?;
    let ty = value.ty();
    value
        .coerce(spec.ty)
        .ok_or_else(|| invalid(format!("expected {}, got {ty}", spec.ty)))
}
