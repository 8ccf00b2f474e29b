//! Binary project streams.
//!
//! Primitives are written with bincode's fixed-width little-endian layout.
//! Both directions keep a sticky status: once a read or write fails every
//! following call is a no-op and [`Serializer::check_stream`] /
//! [`Deserializer::check_stream`] report the failure. Scene nodes are written
//! as integer ids from an [`IdTable`]; reading them back is two-phase, see
//! [`Deserializer::order_id`] and [`Deserializer::finish`].

use crate::{NodeHandle, ObjectTree};
use ossa_utils::log;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};

/// Id written for an absent node.
pub const NULL_ID: i32 = -1;

#[derive(Debug, Clone, PartialEq)]
pub enum EncodeError {
    CountOverflow(usize),
    PendingReference(i32),
    Stream(String),
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CountOverflow(count) => write!(f, "count {} does not fit the stream", count),
            Self::PendingReference(id) => write!(f, "reference id {} was never resolved", id),
            Self::Stream(reason) => write!(f, "stream error: {}", reason),
        }
    }
}

impl std::error::Error for EncodeError {}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    Format { scope: String, message: String },
    UnresolvedId(i32),
    Stream(String),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Format { scope, message } if scope.is_empty() => write!(f, "{}", message),
            Self::Format { scope, message } => write!(f, "{}: {}", scope, message),
            Self::UnresolvedId(id) => write!(f, "reference id {} was not resolved", id),
            Self::Stream(reason) => write!(f, "stream error: {}", reason),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Serial ids of the nodes of one tree, assigned in document order.
#[derive(Debug, Clone, Default)]
pub struct IdTable {
    ids: HashMap<NodeHandle, i32>,
    nodes: Vec<NodeHandle>,
}

impl IdTable {
    pub fn from_tree(tree: &ObjectTree) -> Self {
        let nodes: Vec<NodeHandle> = tree.iter_depth_first(tree.root()).collect();
        let ids = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (*node, i as i32))
            .collect();
        Self { ids, nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes that are absent or not part of the table map to [`NULL_ID`].
    pub fn id_of(&self, node: Option<NodeHandle>) -> i32 {
        node.and_then(|n| self.ids.get(&n).copied())
            .unwrap_or(NULL_ID)
    }

    pub fn node_of(&self, id: i32) -> Option<NodeHandle> {
        if id < 0 {
            return None;
        }
        self.nodes.get(id as usize).copied()
    }
}

/// A node id read from a stream but not yet resolved.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct PendingId(i32);

impl PendingId {
    pub fn id(&self) -> i32 {
        self.0
    }
}

/// Non-owning reference to a scene node that may still wait for id resolution.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NodeRef {
    Null,
    Pending(PendingId),
    Bound(NodeHandle),
}

impl Default for NodeRef {
    fn default() -> Self {
        NodeRef::Null
    }
}

impl From<NodeHandle> for NodeRef {
    fn from(handle: NodeHandle) -> Self {
        NodeRef::Bound(handle)
    }
}

impl From<Option<NodeHandle>> for NodeRef {
    fn from(handle: Option<NodeHandle>) -> Self {
        match handle {
            Some(handle) => NodeRef::Bound(handle),
            None => NodeRef::Null,
        }
    }
}

impl NodeRef {
    /// The bound node. Pending and null references yield `None`.
    pub fn get(&self) -> Option<NodeHandle> {
        match self {
            NodeRef::Bound(handle) => Some(*handle),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, NodeRef::Pending(_))
    }

    pub fn is_set(&self) -> bool {
        !matches!(self, NodeRef::Null)
    }

    pub fn reset(&mut self) {
        *self = NodeRef::Null;
    }

    pub fn resolve(&mut self, resolver: &IdResolver<'_>) -> Result<(), DecodeError> {
        if let NodeRef::Pending(id) = *self {
            *self = resolver.resolve(id)?.into();
        }
        Ok(())
    }
}

pub struct Serializer<'a, W: Write> {
    writer: W,
    ids: &'a IdTable,
    error: Option<String>,
}

impl<'a, W: Write> Serializer<'a, W> {
    pub fn new(writer: W, ids: &'a IdTable) -> Self {
        Self {
            writer,
            ids,
            error: None,
        }
    }

    pub fn write<T: Serialize + ?Sized>(&mut self, value: &T) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = bincode::serialize_into(&mut self.writer, value) {
            self.error = Some(e.to_string());
        }
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write(&value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write(&value);
    }

    /// Writes a collection length as `i32`.
    pub fn write_count(&mut self, count: usize) -> Result<(), EncodeError> {
        if count > std::i32::MAX as usize {
            return Err(EncodeError::CountOverflow(count));
        }
        self.write_i32(count as i32);
        Ok(())
    }

    pub fn write_id(&mut self, node: Option<NodeHandle>) {
        let id = self.ids.id_of(node);
        self.write_i32(id);
    }

    /// Writes a node reference. Pending references have no node to write and fail.
    pub fn write_ref(&mut self, node: &NodeRef) -> Result<(), EncodeError> {
        if let NodeRef::Pending(pending) = node {
            return Err(EncodeError::PendingReference(pending.id()));
        }
        self.write_id(node.get());
        Ok(())
    }

    pub fn check_stream(&mut self) -> Result<(), EncodeError> {
        if self.error.is_none() {
            if let Err(e) = self.writer.flush() {
                self.error = Some(e.to_string());
            }
        }

        match &self.error {
            Some(reason) => Err(EncodeError::Stream(reason.clone())),
            None => Ok(()),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

pub struct Deserializer<R: Read> {
    reader: R,
    scopes: Vec<&'static str>,
    error: Option<String>,
    ordered: Vec<PendingId>,
}

impl<R: Read> Deserializer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            scopes: Vec::new(),
            error: None,
            ordered: Vec::new(),
        }
    }

    /// Reads one value. A failed read leaves the stream errored and yields the default.
    pub fn read<T: DeserializeOwned + Default>(&mut self) -> T {
        if self.error.is_some() {
            return T::default();
        }
        match bincode::deserialize_from(&mut self.reader) {
            Ok(value) => value,
            Err(e) => {
                self.error = Some(e.to_string());
                T::default()
            }
        }
    }

    pub fn read_i32(&mut self) -> i32 {
        self.read()
    }

    pub fn read_f32(&mut self) -> f32 {
        self.read()
    }

    /// First phase of reading a node reference: reads its id and records it for
    /// [`Deserializer::finish`].
    pub fn order_id(&mut self) -> Result<PendingId, DecodeError> {
        let id = self.read_i32();
        self.check_stream()?;
        if id < NULL_ID {
            return Err(self.errored(format!("invalid reference id {}", id)));
        }

        let pending = PendingId(id);
        self.ordered.push(pending);
        Ok(pending)
    }

    pub fn ordered_ids(&self) -> &[PendingId] {
        self.ordered.as_slice()
    }

    pub fn push_log_scope(&mut self, scope: &'static str) {
        self.scopes.push(scope);
    }

    pub fn pop_log_scope(&mut self) {
        self.scopes.pop();
    }

    /// Builds a format error for the current scope and logs it.
    pub fn errored<S: Into<String>>(&self, message: S) -> DecodeError {
        let scope = log::scope_path(&self.scopes);
        let message = message.into();
        log::error!("[{}] {}", scope, message);
        DecodeError::Format { scope, message }
    }

    pub fn check_stream(&self) -> Result<(), DecodeError> {
        match &self.error {
            Some(reason) => Err(DecodeError::Stream(reason.clone())),
            None => Ok(()),
        }
    }

    /// Second phase: once the whole graph is loaded, checks every ordered id
    /// against `ids` and hands out the resolver for the completion step.
    pub fn finish<'t>(&self, ids: &'t IdTable) -> Result<IdResolver<'t>, DecodeError> {
        self.check_stream()?;

        for pending in self.ordered.iter() {
            if pending.0 != NULL_ID && ids.node_of(pending.0).is_none() {
                log::error!("reference id {} has no node", pending.0);
                return Err(DecodeError::UnresolvedId(pending.0));
            }
        }
        Ok(IdResolver { ids })
    }
}

pub struct IdResolver<'a> {
    ids: &'a IdTable,
}

impl<'a> IdResolver<'a> {
    pub fn new(ids: &'a IdTable) -> Self {
        Self { ids }
    }

    pub fn resolve(&self, pending: PendingId) -> Result<Option<NodeHandle>, DecodeError> {
        if pending.0 == NULL_ID {
            return Ok(None);
        }
        match self.ids.node_of(pending.0) {
            Some(node) => Ok(Some(node)),
            None => Err(DecodeError::UnresolvedId(pending.0)),
        }
    }
}
