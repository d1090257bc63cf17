//! Resource data model shared by the watch, mux and subscription layers.
//!
//! A `RawResource` is what the transport hands us: an opaque payload plus
//! naming/version metadata. A `ResourceDecoder` turns it into a
//! `DecodedResource` whose payload is a concrete deserialized value,
//! type-erased so that the fan-out machinery stays payload-agnostic.

mod decoder;
pub use decoder::*;


use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

/// Opaque string identifier, unique within a resource type.
pub type ResourceName = String;

/// Marker name reported in interest diffs when a type gains its first or
/// loses its last wildcard watch.
pub const WILDCARD: &str = "*";

/// What a watch (or a whole type subscription) wants from upstream.
///
/// The legacy call convention where an *empty* name set means "everything"
/// is preserved at API boundaries, but state is always held as this
/// explicit variant so the two meanings can never be confused internally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterestSet {
    /// Interested in every resource of the type.
    Wildcard,
    /// Interested in exactly these names. Never empty.
    Names(BTreeSet<ResourceName>),
}

impl InterestSet {
    /// Converts the boundary representation: empty set means wildcard.
    pub fn from_names(names: BTreeSet<ResourceName>) -> Self {
        if names.is_empty() {
            InterestSet::Wildcard
        } else {
            InterestSet::Names(names)
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, InterestSet::Wildcard)
    }

    pub fn covers(&self, name: &str) -> bool {
        match self {
            InterestSet::Wildcard => true,
            InterestSet::Names(names) => names.contains(name),
        }
    }
}

/// A resource as delivered by the transport, before payload decoding.
///
/// `name` and `aliases` may be empty for full-state protocols where naming
/// lives inside the payload; the decoder falls back to the payload then.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResource {
    pub name: String,
    pub version: String,
    pub aliases: Vec<String>,
    pub type_url: String,
    pub payload: Vec<u8>,
}

/// A named resource with its deserialized, type-erased payload.
#[derive(Clone)]
pub struct DecodedResource {
    name: String,
    version: String,
    aliases: Vec<String>,
    payload: Rc<dyn Any>,
}

impl DecodedResource {
    pub fn new(
        name: String,
        version: String,
        aliases: Vec<String>,
        payload: Rc<dyn Any>,
    ) -> Self {
        Self {
            name,
            version,
            aliases,
            payload,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Secondary names this resource may be addressed under.
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Downcasts the payload to its concrete type. `None` means the caller
    /// wired a decoder for a different payload type.
    pub fn payload_as<T: 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Debug for DecodedResource {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("DecodedResource")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("aliases", &self.aliases)
            .finish()
    }
}

/// One inbound update from the transport, either wire variant.
///
/// Both variants feed the same fan-out algorithm; only the
/// removal-synthesis branch differs between them.
#[derive(Debug, Clone)]
pub enum UpdateBatch {
    FullState {
        resources: Vec<RawResource>,
        version: String,
    },
    Delta {
        added: Vec<RawResource>,
        removed: Vec<ResourceName>,
        version: String,
        is_heartbeat: bool,
    },
}

impl UpdateBatch {
    pub fn version(&self) -> &str {
        match self {
            UpdateBatch::FullState { version, .. } => version,
            UpdateBatch::Delta { version, .. } => version,
        }
    }
}
