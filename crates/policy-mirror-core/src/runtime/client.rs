// crates/policy-mirror-core/src/runtime/client.rs
// ============================================================================
// Module: Policy Mirror Store Client
// Description: Typed, scope-bound wrapper over an object backend.
// Purpose: Give adapters idempotent create/delete over one object kind.
// Dependencies: serde_json, crate::core, crate::interfaces, crate::runtime::registry
// ============================================================================

//! ## Overview
//! [`StoreClient`] binds an [`ObjectBackend`] to one [`ObjectKind`] and one
//! [`Scope`]. Objects created through the client are always stamped with the
//! scope's namespace and exact label set, so a client can never write outside
//! its scope. Create tolerates "already exists" and delete tolerates "not
//! found"; both are reported as success.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::error;

use crate::core::FieldSelector;
use crate::core::ObjectKind;
use crate::core::ObjectList;
use crate::core::ObjectMeta;
use crate::core::RawObject;
use crate::core::Scope;
use crate::interfaces::ObjectBackend;
use crate::interfaces::StoreError;
use crate::interfaces::WatchEvent;
use crate::interfaces::WatchStream;
use crate::runtime::registry::KindInfo;
use crate::runtime::registry::KindRegistry;

// ============================================================================
// SECTION: Store Client
// ============================================================================

/// Scope-bound client for objects of kind `K`.
pub struct StoreClient<K: ObjectKind> {
    /// Backend executing requests.
    backend: Arc<dyn ObjectBackend>,
    /// Scope stamped on writes and applied to reads.
    scope: Scope,
    /// Descriptor resolved from the registry.
    info: KindInfo,
    /// Marker for the typed kind.
    kind: PhantomData<fn() -> K>,
}

impl<K: ObjectKind> Clone for StoreClient<K> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            scope: self.scope.clone(),
            info: self.info,
            kind: PhantomData,
        }
    }
}

impl<K: ObjectKind> StoreClient<K> {
    /// Creates a client for `K` resolved through `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when `K` is not registered or the scope
    /// has no namespace.
    pub fn new(backend: Arc<dyn ObjectBackend>, registry: &KindRegistry, scope: Scope) -> Result<Self, StoreError> {
        let info = registry.resolve::<K>()?;
        if scope.namespace.trim().is_empty() {
            return Err(StoreError::Invalid("scope namespace must be non-empty".to_string()));
        }
        Ok(Self {
            backend,
            scope,
            info,
            kind: PhantomData,
        })
    }

    /// Returns the client's scope.
    #[must_use]
    pub const fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Builds an unsaved object in the client's scope.
    #[must_use]
    pub fn new_object(&self, name: impl Into<String>, spec: K::Spec) -> K {
        let metadata = ObjectMeta::new(name, self.scope.namespace.clone(), self.scope.labels.clone());
        K::from_parts(metadata, spec)
    }

    /// Returns an empty typed list.
    #[must_use]
    pub const fn new_list(&self) -> ObjectList<K> {
        ObjectList::new()
    }

    /// Creates an object. An existing object with the same name in this
    /// scope is success.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the name is held by an object of
    /// another label set, and [`StoreError`] for any other failure.
    pub fn create(&self, object: &K) -> Result<(), StoreError> {
        let raw = self.to_raw(object)?;
        let name = raw.metadata.name.clone();
        match self.backend.create(raw) {
            Ok(_) => Ok(()),
            Err(StoreError::AlreadyExists(_)) => self.ensure_owned(&name),
            Err(err) => Err(err),
        }
    }

    /// Fetches an object by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the object is absent or belongs
    /// to another label set.
    pub fn get(&self, name: &str) -> Result<K, StoreError> {
        let raw = self.backend.get(self.info.kind, &self.scope.namespace, name)?;
        if !self.scope.contains(&raw.metadata) {
            return Err(StoreError::NotFound(format!("{}/{name}", self.scope)));
        }
        self.from_raw(raw)
    }

    /// Lists every object in scope, soft-deleted ones included.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when listing or decoding fails.
    pub fn list(&self) -> Result<ObjectList<K>, StoreError> {
        let raw = self.backend.list(self.info.kind, &self.scope)?;
        let mut list = self.new_list();
        list.revision = raw.revision;
        list.items = raw.items.into_iter().map(|object| self.from_raw(object)).collect::<Result<_, _>>()?;
        Ok(list)
    }

    /// Replaces an object, checking its resource version when set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] on a stale resource version.
    pub fn update(&self, object: &K) -> Result<K, StoreError> {
        let raw = self.to_raw(object)?;
        let updated = self.backend.update(raw)?;
        self.from_raw(updated)
    }

    /// Deletes an object. An absent object is success.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] for any failure other than "not found".
    pub fn delete(&self, object: &K) -> Result<(), StoreError> {
        self.delete_by_name(&object.metadata().name)
    }

    /// Deletes an object by name. An absent object is success.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] for any failure other than "not found".
    pub fn delete_by_name(&self, name: &str) -> Result<(), StoreError> {
        let existing = match self.backend.get(self.info.kind, &self.scope.namespace, name) {
            Ok(existing) => existing,
            Err(StoreError::NotFound(_)) => return Ok(()),
            Err(err) => return Err(err),
        };
        if !self.scope.contains(&existing.metadata) {
            return Ok(());
        }
        match self.backend.delete(self.info.kind, &self.scope.namespace, name) {
            Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Deletes every object in scope. Returns the number affected.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store rejects the request.
    pub fn delete_all(&self) -> Result<usize, StoreError> {
        self.backend.delete_collection(self.info.kind, &self.scope, &FieldSelector::new())
    }

    /// Deletes every object in scope matching `selector` in one request.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when the selector names a field that is
    /// not selectable on this kind.
    pub fn delete_matching(&self, selector: &FieldSelector) -> Result<usize, StoreError> {
        self.info.validate_selector(selector)?;
        self.backend.delete_collection(self.info.kind, &self.scope, selector)
    }

    /// Opens a typed watch on the client's scope.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the watch cannot be established.
    pub fn watch(&self) -> Result<TypedWatch<K>, StoreError> {
        let stream = self.backend.watch(self.info.kind, &self.scope)?;
        Ok(TypedWatch {
            stream,
            client: self.clone(),
        })
    }

    /// Confirms that an existing object named `name` belongs to this scope.
    fn ensure_owned(&self, name: &str) -> Result<(), StoreError> {
        let existing = match self.backend.get(self.info.kind, &self.scope.namespace, name) {
            Ok(existing) => existing,
            Err(StoreError::NotFound(_)) => {
                return Err(StoreError::Conflict(format!("{name} was deleted while being created")));
            }
            Err(err) => return Err(err),
        };
        if self.scope.contains(&existing.metadata) {
            Ok(())
        } else {
            Err(StoreError::Conflict(format!("{name} is held by another label set in {}", self.scope.namespace)))
        }
    }

    /// Encodes a typed object, stamping kind and scope.
    fn to_raw(&self, object: &K) -> Result<RawObject, StoreError> {
        let spec = serde_json::to_value(object.spec())
            .map_err(|err| StoreError::Invalid(format!("{} spec encode failed: {err}", self.info.kind)))?;
        let mut metadata = object.metadata().clone();
        if metadata.name.trim().is_empty() {
            return Err(StoreError::Invalid(format!("{} name must be non-empty", self.info.kind)));
        }
        metadata.namespace.clone_from(&self.scope.namespace);
        metadata.labels.clone_from(&self.scope.labels);
        Ok(RawObject {
            api_version: self.info.api_version.to_string(),
            kind: self.info.kind.to_string(),
            metadata,
            spec,
        })
    }

    /// Decodes a raw object into `K`.
    fn from_raw(&self, raw: RawObject) -> Result<K, StoreError> {
        if raw.kind != self.info.kind || raw.api_version != self.info.api_version {
            return Err(StoreError::Corrupt(format!(
                "expected {}/{} but found {}/{}",
                self.info.api_version, self.info.kind, raw.api_version, raw.kind
            )));
        }
        let spec = serde_json::from_value(raw.spec).map_err(|err| {
            StoreError::Corrupt(format!("{} {} spec decode failed: {err}", self.info.kind, raw.metadata.name))
        })?;
        Ok(K::from_parts(raw.metadata, spec))
    }
}

// ============================================================================
// SECTION: Typed Watch
// ============================================================================

/// Watch stream decoding events into `K`.
pub struct TypedWatch<K: ObjectKind> {
    /// Underlying raw stream.
    stream: WatchStream,
    /// Client used for decoding.
    client: StoreClient<K>,
}

impl<K: ObjectKind> TypedWatch<K> {
    /// Waits for the next decoded event. Returns `None` when the feed ends.
    ///
    /// Objects that fail to decode are logged and skipped; only errors sent
    /// by the backend are returned. A modification that turns a decodable
    /// object undecodable surfaces as a deletion of the last good snapshot,
    /// and the reverse as an addition.
    pub async fn next(&mut self) -> Option<Result<WatchEvent<K>, StoreError>> {
        loop {
            match self.stream.next().await? {
                Ok(event) => {
                    if let Some(decoded) = self.decode(event) {
                        return Some(Ok(decoded));
                    }
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }

    /// Decodes one raw event, dropping payloads that do not decode.
    fn decode(&self, event: WatchEvent<RawObject>) -> Option<WatchEvent<K>> {
        match event {
            WatchEvent::Added {
                object,
                initial,
            } => self.decode_object(object).map(|object| WatchEvent::Added {
                object,
                initial,
            }),
            WatchEvent::Modified {
                old,
                new,
            } => match (self.decode_object(old), self.decode_object(new)) {
                (Some(old), Some(new)) => Some(WatchEvent::Modified {
                    old,
                    new,
                }),
                (Some(old), None) => Some(WatchEvent::Deleted {
                    object: old,
                }),
                (None, Some(new)) => Some(WatchEvent::Added {
                    object: new,
                    initial: false,
                }),
                (None, None) => None,
            },
            WatchEvent::Deleted {
                object,
            } => self.decode_object(object).map(|object| WatchEvent::Deleted {
                object,
            }),
            WatchEvent::SnapshotComplete => Some(WatchEvent::SnapshotComplete),
        }
    }

    /// Decodes one object, logging and discarding failures.
    fn decode_object(&self, raw: RawObject) -> Option<K> {
        let name = raw.metadata.name.clone();
        match self.client.from_raw(raw) {
            Ok(object) => Some(object),
            Err(err) => {
                error!(scope = %self.client.scope, key = %name, error = %err, "skipping undecodable object");
                None
            }
        }
    }
}
