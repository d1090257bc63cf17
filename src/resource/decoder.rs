use std::marker::PhantomData;
use std::rc::Rc;

use serde::de::DeserializeOwned;

use super::{DecodedResource, RawResource};
use crate::UpdateError;

/// Payload types that know their own resource name. Needed for full-state
/// protocols, where the envelope carries no per-resource naming.
pub trait NamedPayload: DeserializeOwned + 'static {
    fn resource_name(&self) -> String;

    /// Secondary names this payload declares for itself.
    fn payload_aliases(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Turns a raw transport resource into a decoded one. One decoder instance
/// per watch; all watches of a type are expected to agree on payload type.
pub trait ResourceDecoder {
    /// Type URL this decoder accepts.
    fn type_url(&self) -> &str;

    fn decode(
        &self,
        raw: &RawResource,
    ) -> std::result::Result<DecodedResource, UpdateError>;
}

/// Decoder for bincode-serialized payloads.
pub struct BincodeDecoder<T: NamedPayload> {
    type_url: String,
    _marker: PhantomData<T>,
}

impl<T: NamedPayload> BincodeDecoder<T> {
    pub fn new(type_url: impl Into<String>) -> Self {
        Self {
            type_url: type_url.into(),
            _marker: PhantomData,
        }
    }
}

impl<T: NamedPayload> ResourceDecoder for BincodeDecoder<T> {
    fn type_url(&self) -> &str {
        &self.type_url
    }

    fn decode(
        &self,
        raw: &RawResource,
    ) -> std::result::Result<DecodedResource, UpdateError> {
        if raw.type_url != self.type_url {
            return Err(UpdateError::TypeMismatch {
                expected: self.type_url.clone(),
                got: raw.type_url.clone(),
            });
        }
        let payload: T =
            bincode::deserialize(&raw.payload).map_err(|source| UpdateError::ResourceDecode {
                name: raw.name.clone(),
                source,
            })?;
        let name = if raw.name.is_empty() {
            payload.resource_name()
        } else {
            raw.name.clone()
        };
        let aliases = if raw.aliases.is_empty() {
            payload.payload_aliases()
        } else {
            raw.aliases.clone()
        };
        Ok(DecodedResource::new(
            name,
            raw.version.clone(),
            aliases,
            Rc::new(payload),
        ))
    }
}
