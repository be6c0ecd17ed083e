use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use crate::handler::BoxedHandler;
use crate::options::{Attributes, BuildHandlerError};

/// Builds a handler from the shared context and the job's parsed payload.
pub type HandlerFactory<Ctx> =
    Arc<dyn Fn(&Ctx, &Attributes) -> Result<BoxedHandler, BuildHandlerError> + Send + Sync>;

/// Maps a payload `type` tag to the factory building its handler.
///
/// The registry is an ordinary value: create one, register factories, and
/// hand it to the store. Registration may happen while workers are running.
pub struct HandlerRegistry<Ctx> {
    factories: RwLock<HashMap<String, HandlerFactory<Ctx>>>,
}

impl<Ctx> Default for HandlerRegistry<Ctx> {
    fn default() -> Self {
        HandlerRegistry {
            factories: RwLock::new(HashMap::new()),
        }
    }
}

impl<Ctx> Debug for HandlerRegistry<Ctx> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("type_tags", &self.type_tags())
            .finish()
    }
}

impl<Ctx> HandlerRegistry<Ctx> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` for `type_tag`, returning the factory it replaced.
    pub fn register<F>(&self, type_tag: impl Into<String>, factory: F) -> Option<HandlerFactory<Ctx>>
    where
        F: Fn(&Ctx, &Attributes) -> Result<BoxedHandler, BuildHandlerError> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(type_tag.into(), Arc::new(factory))
    }

    pub fn unregister(&self, type_tag: &str) -> bool {
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(type_tag)
            .is_some()
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(type_tag)
    }

    pub fn type_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        tags.sort();
        tags
    }

    /// Builds the handler for a payload from its `type` attribute.
    pub fn build(&self, ctx: &Ctx, attributes: &Attributes) -> Result<BoxedHandler, BuildHandlerError> {
        let type_tag = match attributes.get("type") {
            None | Some(Value::Null) => return Err(BuildHandlerError::MissingType),
            Some(Value::String(tag)) if tag.is_empty() => return Err(BuildHandlerError::MissingType),
            Some(Value::String(tag)) => tag,
            Some(other) => {
                return Err(BuildHandlerError::invalid(
                    "type",
                    format!("expected a string, got {other}"),
                ))
            }
        };

        // The lock is released before the factory runs so factories may use the registry.
        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(type_tag)
            .cloned()
            .ok_or_else(|| BuildHandlerError::UnknownType(type_tag.clone()))?;

        factory(ctx, attributes)
    }
}
