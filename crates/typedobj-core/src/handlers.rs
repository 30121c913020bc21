//! Per-type id handlers and the batch-wide handler set.
//!
//! Ids discovered while validating a batch are added to an
//! [`IdReferenceHandlerSet`] under the object they came from. Once every
//! document has been validated, a single [`IdReferenceHandlerSet::process`]
//! call resolves all ids of each type in one round trip; afterwards the set is
//! sealed and only answers remapping queries.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use tracing::{debug, info};

use crate::errors::{IdReferenceError, IdReferenceErrorKind, IdReferenceHandlerError};
use crate::idref::{IdReference, IdReferenceType, RemappedId};
use crate::resolver::{IdResolver, ResolutionFailure, ResolutionRequest};

/// Default cap on unique ids tracked by a handler set.
pub const DEFAULT_MAX_UNIQUE_IDS: usize = 100_000;

/// Resolution logic for one reference type.
///
/// `T` identifies the object an id was found in, so failures and remapped
/// ids can be attributed back to it.
pub trait IdReferenceHandler<T>: Send {
    /// Reference type served by this handler.
    fn id_type(&self) -> &IdReferenceType;

    /// Records `id` under `origin`. Returns true when the `(origin, id)` pair is new.
    fn add_id(
        &mut self,
        origin: &T,
        id: &str,
        attributes: &[String],
    ) -> Result<bool, IdReferenceHandlerError>;

    /// Resolves every recorded id. Idempotent.
    fn process_ids(&mut self) -> Result<(), IdReferenceHandlerError>;

    /// Rejects further `add_id` calls.
    fn lock(&mut self);

    /// True once `process_ids` has succeeded.
    fn is_processed(&self) -> bool;

    /// Resolved form of `id`.
    fn remapped_id(&self, id: &str) -> Result<&RemappedId, IdReferenceHandlerError>;

    /// Resolved forms of every id recorded under `origin`.
    fn remapped_ids_for(&self, origin: &T) -> Result<BTreeSet<RemappedId>, IdReferenceHandlerError>;

    /// Number of distinct id texts recorded.
    fn id_count(&self) -> usize;
}

struct IdEntry<T> {
    attribute_sets: Vec<Vec<String>>,
    first_origin: T,
}

struct IdRegistry<T> {
    id_type: IdReferenceType,
    ids: BTreeMap<String, IdEntry<T>>,
    by_origin: BTreeMap<T, BTreeSet<String>>,
    remapped: HashMap<String, RemappedId>,
    locked: bool,
    processed: bool,
}

impl<T: Clone + Ord + fmt::Display> IdRegistry<T> {
    fn new(id_type: IdReferenceType) -> Self {
        Self {
            id_type,
            ids: BTreeMap::new(),
            by_origin: BTreeMap::new(),
            remapped: HashMap::new(),
            locked: false,
            processed: false,
        }
    }

    fn error(&self, id: &str, origin: &T, attributes: &[String], kind: IdReferenceErrorKind) -> IdReferenceHandlerError {
        IdReferenceError {
            kind,
            id_type: self.id_type.clone(),
            id: id.to_string(),
            attributes: attributes.to_vec(),
            origin: origin.to_string(),
        }
        .into()
    }

    fn add(&mut self, origin: &T, id: &str, attributes: &[String]) -> Result<bool, IdReferenceHandlerError> {
        if self.locked {
            return Err(IdReferenceHandlerError::Locked(self.id_type.clone()));
        }
        if id.trim().is_empty() {
            return Err(self.error(
                id,
                origin,
                attributes,
                IdReferenceErrorKind::Unparseable("IDs may not be null or the empty string".to_string()),
            ));
        }
        let entry = self.ids.entry(id.to_string()).or_insert_with(|| IdEntry {
            attribute_sets: Vec::new(),
            first_origin: origin.clone(),
        });
        if !attributes.is_empty() && !entry.attribute_sets.iter().any(|a| a == attributes) {
            entry.attribute_sets.push(attributes.to_vec());
        }
        Ok(self
            .by_origin
            .entry(origin.clone())
            .or_default()
            .insert(id.to_string()))
    }

    fn remapped_id(&self, id: &str) -> Result<&RemappedId, IdReferenceHandlerError> {
        if !self.processed {
            return Err(IdReferenceHandlerError::NotProcessed(self.id_type.clone()));
        }
        self.remapped
            .get(id)
            .ok_or_else(|| IdReferenceHandlerError::NoSuchId {
                id_type: self.id_type.clone(),
                id: id.to_string(),
            })
    }

    fn remapped_ids_for(&self, origin: &T) -> Result<BTreeSet<RemappedId>, IdReferenceHandlerError> {
        if !self.processed {
            return Err(IdReferenceHandlerError::NotProcessed(self.id_type.clone()));
        }
        let Some(ids) = self.by_origin.get(origin) else {
            return Ok(BTreeSet::new());
        };
        ids.iter()
            .map(|id| self.remapped_id(id).cloned())
            .collect()
    }
}

/// Handler backed by an [`IdResolver`].
///
/// Every id is resolved in one `resolve` call per `process_ids`. A resolved
/// target must satisfy every allowed-type list the id accumulated.
pub struct ResolvingHandler<T, R> {
    registry: IdRegistry<T>,
    resolver: R,
}

impl<T: Clone + Ord + fmt::Display, R: IdResolver> ResolvingHandler<T, R> {
    /// Creates a handler for `id_type`.
    pub fn new(id_type: IdReferenceType, resolver: R) -> Self {
        Self {
            registry: IdRegistry::new(id_type),
            resolver,
        }
    }
}

impl<T, R> IdReferenceHandler<T> for ResolvingHandler<T, R>
where
    T: Clone + Ord + fmt::Display + Send,
    R: IdResolver,
{
    fn id_type(&self) -> &IdReferenceType {
        &self.registry.id_type
    }

    fn add_id(&mut self, origin: &T, id: &str, attributes: &[String]) -> Result<bool, IdReferenceHandlerError> {
        self.registry.add(origin, id, attributes)
    }

    fn process_ids(&mut self) -> Result<(), IdReferenceHandlerError> {
        if self.registry.processed {
            return Ok(());
        }
        self.registry.locked = true;
        let requests: Vec<ResolutionRequest> = self
            .registry
            .ids
            .iter()
            .map(|(id, entry)| ResolutionRequest {
                id: id.clone(),
                allowed_types: entry.attribute_sets.clone(),
            })
            .collect();
        debug!(id_type = %self.registry.id_type, ids = requests.len(), "resolving ids");

        let mut outcomes: HashMap<String, Result<_, ResolutionFailure>> = if requests.is_empty() {
            HashMap::new()
        } else {
            self.resolver
                .resolve(&self.registry.id_type, &requests)
                .map_err(|e| IdReferenceHandlerError::Resolver {
                    id_type: self.registry.id_type.clone(),
                    message: e.to_string(),
                })?
                .into_iter()
                .collect()
        };

        let mut remapped = HashMap::with_capacity(self.registry.ids.len());
        for (id, entry) in &self.registry.ids {
            let target = match outcomes.remove(id).unwrap_or(Err(ResolutionFailure::NotFound)) {
                Ok(target) => target,
                Err(failure) => {
                    let attributes = entry.attribute_sets.first().cloned().unwrap_or_default();
                    return Err(self
                        .registry
                        .error(id, &entry.first_origin, &attributes, failure.into()));
                }
            };
            if let Some(allowed) = entry
                .attribute_sets
                .iter()
                .find(|allowed| !allowed.contains(&target.target_type))
            {
                return Err(self.registry.error(
                    id,
                    &entry.first_origin,
                    allowed,
                    IdReferenceErrorKind::TypeNotAllowed {
                        actual: target.target_type.clone(),
                        allowed: allowed.clone(),
                    },
                ));
            }
            remapped.insert(
                id.clone(),
                RemappedId {
                    id: target.id,
                    target_type: Some(target.target_type),
                },
            );
        }
        self.registry.remapped = remapped;
        self.registry.processed = true;
        Ok(())
    }

    fn lock(&mut self) {
        self.registry.locked = true;
    }

    fn is_processed(&self) -> bool {
        self.registry.processed
    }

    fn remapped_id(&self, id: &str) -> Result<&RemappedId, IdReferenceHandlerError> {
        self.registry.remapped_id(id)
    }

    fn remapped_ids_for(&self, origin: &T) -> Result<BTreeSet<RemappedId>, IdReferenceHandlerError> {
        self.registry.remapped_ids_for(origin)
    }

    fn id_count(&self) -> usize {
        self.registry.ids.len()
    }
}

/// Handler whose ids are already canonical: every id maps to itself.
pub struct IdentityHandler<T> {
    registry: IdRegistry<T>,
}

impl<T: Clone + Ord + fmt::Display> IdentityHandler<T> {
    /// Creates a handler for `id_type`.
    pub fn new(id_type: IdReferenceType) -> Self {
        Self {
            registry: IdRegistry::new(id_type),
        }
    }
}

impl<T: Clone + Ord + fmt::Display + Send> IdReferenceHandler<T> for IdentityHandler<T> {
    fn id_type(&self) -> &IdReferenceType {
        &self.registry.id_type
    }

    fn add_id(&mut self, origin: &T, id: &str, attributes: &[String]) -> Result<bool, IdReferenceHandlerError> {
        self.registry.add(origin, id, attributes)
    }

    fn process_ids(&mut self) -> Result<(), IdReferenceHandlerError> {
        self.registry.locked = true;
        self.registry.remapped = self
            .registry
            .ids
            .keys()
            .map(|id| (id.clone(), RemappedId::new(id.clone())))
            .collect();
        self.registry.processed = true;
        Ok(())
    }

    fn lock(&mut self) {
        self.registry.locked = true;
    }

    fn is_processed(&self) -> bool {
        self.registry.processed
    }

    fn remapped_id(&self, id: &str) -> Result<&RemappedId, IdReferenceHandlerError> {
        self.registry.remapped_id(id)
    }

    fn remapped_ids_for(&self, origin: &T) -> Result<BTreeSet<RemappedId>, IdReferenceHandlerError> {
        self.registry.remapped_ids_for(origin)
    }

    fn id_count(&self) -> usize {
        self.registry.ids.len()
    }
}

/// One handler per reference type plus a batch-wide unique id cap.
pub struct IdReferenceHandlerSet<T> {
    max_unique_ids: usize,
    unique_ids: usize,
    sealed: bool,
    processed: bool,
    handlers: BTreeMap<IdReferenceType, Box<dyn IdReferenceHandler<T>>>,
}

/// Builder for [`IdReferenceHandlerSet`].
pub struct IdReferenceHandlerSetBuilder<T> {
    max_unique_ids: usize,
    handlers: BTreeMap<IdReferenceType, Box<dyn IdReferenceHandler<T>>>,
}

impl<T> IdReferenceHandlerSetBuilder<T> {
    /// Starts a builder with the given cap.
    pub fn new(max_unique_ids: usize) -> Self {
        Self {
            max_unique_ids,
            handlers: BTreeMap::new(),
        }
    }

    /// Sets the unique id cap.
    pub fn max_unique_ids(mut self, max: usize) -> Self {
        self.max_unique_ids = max;
        self
    }

    /// Registers a handler, replacing any handler of the same type.
    pub fn with_handler(mut self, handler: impl IdReferenceHandler<T> + 'static) -> Self {
        self.handlers
            .insert(handler.id_type().clone(), Box::new(handler));
        self
    }

    /// Finishes the set.
    pub fn build(self) -> IdReferenceHandlerSet<T> {
        IdReferenceHandlerSet {
            max_unique_ids: self.max_unique_ids,
            unique_ids: 0,
            sealed: false,
            processed: false,
            handlers: self.handlers,
        }
    }
}

impl<T> Default for IdReferenceHandlerSetBuilder<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_UNIQUE_IDS)
    }
}

impl<T> IdReferenceHandlerSet<T> {
    /// Starts a builder with the given cap.
    pub fn builder(max_unique_ids: usize) -> IdReferenceHandlerSetBuilder<T> {
        IdReferenceHandlerSetBuilder::new(max_unique_ids)
    }

    /// True when a handler serves `id_type`.
    pub fn has_handler(&self, id_type: &IdReferenceType) -> bool {
        self.handlers.contains_key(id_type)
    }

    /// Registered reference types.
    pub fn id_types(&self) -> impl Iterator<Item = &IdReferenceType> {
        self.handlers.keys()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Unique `(object, id)` pairs recorded so far.
    pub fn unique_id_count(&self) -> usize {
        self.unique_ids
    }

    /// Configured cap.
    pub fn max_unique_ids(&self) -> usize {
        self.max_unique_ids
    }

    /// Records a reference found in `origin`.
    pub fn add(&mut self, origin: &T, reference: &IdReference) -> Result<bool, IdReferenceHandlerError> {
        self.add_id(origin, reference.id_type(), reference.id(), reference.attributes())
    }

    /// Records an id that did not come from validation, such as a provenance id.
    pub fn add_id(
        &mut self,
        origin: &T,
        id_type: &IdReferenceType,
        id: &str,
        attributes: &[String],
    ) -> Result<bool, IdReferenceHandlerError> {
        let handler = self
            .handlers
            .get_mut(id_type)
            .ok_or_else(|| IdReferenceHandlerError::NoHandler(id_type.clone()))?;
        if self.sealed {
            return Err(IdReferenceHandlerError::Locked(id_type.clone()));
        }
        let new = handler.add_id(origin, id, attributes)?;
        if new {
            self.unique_ids += 1;
            if self.unique_ids > self.max_unique_ids {
                return Err(IdReferenceHandlerError::TooManyIds {
                    max: self.max_unique_ids,
                });
            }
        }
        Ok(new)
    }

    /// Seals the set and resolves every id, one batch per type.
    pub fn process(&mut self) -> Result<(), IdReferenceHandlerError> {
        if self.processed {
            return Ok(());
        }
        self.sealed = true;
        for handler in self.handlers.values_mut() {
            handler.lock();
        }
        for handler in self.handlers.values_mut() {
            handler.process_ids()?;
        }
        self.processed = true;
        info!(
            types = self.handlers.len(),
            unique_ids = self.unique_ids,
            "processed id references"
        );
        Ok(())
    }

    /// True once `process` has succeeded.
    pub fn is_processed(&self) -> bool {
        self.processed
    }

    fn handler(&self, id_type: &IdReferenceType) -> Result<&dyn IdReferenceHandler<T>, IdReferenceHandlerError> {
        self.handlers
            .get(id_type)
            .map(|h| h.as_ref())
            .ok_or_else(|| IdReferenceHandlerError::NoHandler(id_type.clone()))
    }

    /// Resolved form of `id`.
    pub fn remapped_id(&self, id_type: &IdReferenceType, id: &str) -> Result<&RemappedId, IdReferenceHandlerError> {
        self.handler(id_type)?.remapped_id(id)
    }

    /// Resolved forms of every id of `id_type` recorded under `origin`.
    pub fn remapped_ids_for(
        &self,
        id_type: &IdReferenceType,
        origin: &T,
    ) -> Result<BTreeSet<RemappedId>, IdReferenceHandlerError> {
        self.handler(id_type)?.remapped_ids_for(origin)
    }
}

impl<T> fmt::Debug for IdReferenceHandlerSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdReferenceHandlerSet")
            .field("types", &self.handlers.keys().collect::<Vec<_>>())
            .field("unique_ids", &self.unique_ids)
            .field("max_unique_ids", &self.max_unique_ids)
            .field("processed", &self.processed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::LocationPath;
    use crate::resolver::StaticResolver;
    use std::sync::Arc;

    fn ty(name: &str) -> IdReferenceType {
        IdReferenceType::parse(name).unwrap()
    }

    fn identity_set(max: usize) -> IdReferenceHandlerSet<u32> {
        IdReferenceHandlerSet::builder(max)
            .with_handler(IdentityHandler::new(ty("a")))
            .with_handler(IdentityHandler::new(ty("b")))
            .build()
    }

    #[test]
    fn test_cap_is_global_across_handlers() {
        let mut set = identity_set(3);
        assert!(set.add_id(&1, &ty("a"), "x", &[]).unwrap());
        assert!(set.add_id(&1, &ty("b"), "y", &[]).unwrap());
        assert!(set.add_id(&2, &ty("a"), "x", &[]).unwrap());
        assert!(!set.add_id(&1, &ty("a"), "x", &[]).unwrap());
        assert_eq!(set.unique_id_count(), 3);
        assert_eq!(
            set.add_id(&1, &ty("b"), "z", &[]).unwrap_err(),
            IdReferenceHandlerError::TooManyIds { max: 3 }
        );
    }

    #[test]
    fn test_set_is_sealed_after_process() {
        let mut set = identity_set(10);
        set.add_id(&1, &ty("a"), "x", &[]).unwrap();
        assert!(matches!(
            set.remapped_id(&ty("a"), "x"),
            Err(IdReferenceHandlerError::NotProcessed(_))
        ));
        set.process().unwrap();
        set.process().unwrap();
        assert_eq!(set.remapped_id(&ty("a"), "x").unwrap().id, "x");
        assert!(matches!(
            set.add_id(&1, &ty("a"), "y", &[]),
            Err(IdReferenceHandlerError::Locked(_))
        ));
        assert!(matches!(
            set.remapped_id(&ty("a"), "nope"),
            Err(IdReferenceHandlerError::NoSuchId { .. })
        ));
    }

    #[test]
    fn test_unknown_type_and_empty_id() {
        let mut set = identity_set(10);
        assert_eq!(
            set.add_id(&1, &ty("c"), "x", &[]).unwrap_err(),
            IdReferenceHandlerError::NoHandler(ty("c"))
        );
        let err = set.add_id(&7, &ty("a"), " ", &[]).unwrap_err();
        match err {
            IdReferenceHandlerError::Reference(e) => {
                assert!(matches!(e.kind, IdReferenceErrorKind::Unparseable(_)));
                assert_eq!(e.origin, "7");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_resolving_handler_batches_and_checks_types() {
        let resolver = Arc::new(
            StaticResolver::new()
                .with_target("g1", "1/1/1", "Genome")
                .with_target("c1", "1/2/1", "Contig"),
        );
        let mut set = IdReferenceHandlerSet::builder(10)
            .with_handler(ResolvingHandler::new(ty("ws"), Arc::clone(&resolver)))
            .build();
        let reference = IdReference::new(ty("ws"), "g1", LocationPath::root(), false, vec!["Genome".into()]);
        set.add(&1u32, &reference).unwrap();
        set.add_id(&2u32, &ty("ws"), "c1", &[]).unwrap();
        set.add_id(&2u32, &ty("ws"), "g1", &[]).unwrap();
        set.process().unwrap();
        assert_eq!(resolver.call_count(), 1);

        let remapped = set.remapped_id(&ty("ws"), "g1").unwrap();
        assert_eq!(remapped.id, "1/1/1");
        assert_eq!(remapped.target_type.as_deref(), Some("Genome"));
        let for_two = set.remapped_ids_for(&ty("ws"), &2).unwrap();
        assert_eq!(
            for_two.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["1/1/1", "1/2/1"]
        );
    }

    #[test]
    fn test_every_attribute_list_must_hold() {
        let resolver = StaticResolver::new().with_target("c1", "1/2/1", "Contig");
        let mut set = IdReferenceHandlerSet::builder(10)
            .with_handler(ResolvingHandler::new(ty("ws"), resolver))
            .build();
        set.add_id(&1u32, &ty("ws"), "c1", &["Contig".to_string()]).unwrap();
        set.add_id(&2u32, &ty("ws"), "c1", &["Genome".to_string()]).unwrap();
        match set.process().unwrap_err() {
            IdReferenceHandlerError::Reference(e) => {
                assert_eq!(e.id, "c1");
                assert_eq!(e.origin, "1");
                assert_eq!(
                    e.kind,
                    IdReferenceErrorKind::TypeNotAllowed {
                        actual: "Contig".into(),
                        allowed: vec!["Genome".into()],
                    }
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_resolution_failures_are_attributed() {
        let resolver = StaticResolver::new().with_denied("secret", "private workspace");
        let mut set = IdReferenceHandlerSet::builder(10)
            .with_handler(ResolvingHandler::new(ty("ws"), resolver))
            .build();
        set.add_id(&4u32, &ty("ws"), "secret", &[]).unwrap();
        let err = set.process().unwrap_err();
        let IdReferenceHandlerError::Reference(e) = err else {
            panic!("unexpected {err:?}");
        };
        assert_eq!(e.kind, IdReferenceErrorKind::NotAuthorized("private workspace".into()));
        assert_eq!(e.origin, "4");

        let mut set = IdReferenceHandlerSet::builder(10)
            .with_handler(ResolvingHandler::new(ty("ws"), StaticResolver::new()))
            .build();
        set.add_id(&5u32, &ty("ws"), "ghost", &[]).unwrap();
        let IdReferenceHandlerError::Reference(e) = set.process().unwrap_err() else {
            panic!("expected a reference error");
        };
        assert_eq!(e.kind, IdReferenceErrorKind::NotFound);
    }
}
