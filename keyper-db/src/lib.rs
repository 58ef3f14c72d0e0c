//! The `Db`: a named registry of [`Collection`]s, the wiring pass that turns
//! declared relations/back-references/parent-child config into two-way links, and
//! the [`CollectionRegistry`] implementation every `Collection` uses to reach its
//! siblings (spec.md §4.4, §6, §9 "registry keyed by name").
//!
//! Collections can be created in any order. A relation whose target collection
//! doesn't exist yet (or a `parent` pointing at one) is queued and wired the moment
//! that target is created — the two-phase build the Design Notes call for ("create
//! all collection shells, then link relations"), collapsed here into "create
//! whichever shells exist so far, queue the rest".

mod error;

pub use error::DbError;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

use keyper_collection::{BackRefInfo, Collection, CollectionConfig, CollectionError, CollectionRegistry};
use keyper_core::Entity;
use keyper_datasource::DataSource;
use tokio::sync::broadcast;

/// A transform applied to every [`CollectionConfig`] just before its collection is
/// built, e.g. to install a house-wide `before_insert` hook (spec.md §6,
/// "per-collection defaults applied via `collectionDefaults`").
pub type CollectionDefaults = Arc<dyn Fn(CollectionConfig) -> CollectionConfig + Send + Sync>;

#[derive(Default)]
struct PendingWiring {
    /// Back-references declared by a relation whose target doesn't exist yet,
    /// queued under the target's name until it is created.
    back_refs: HashMap<String, Vec<PendingBackRef>>,
    /// `parent` links declared before the parent collection existed, queued under
    /// the parent's name.
    children: HashMap<String, Vec<String>>,
}

/// A back-reference queued until its target collection is created. Carries enough
/// of the originating relation to re-run the explicit-foreign-key-on-compound-target
/// check once the target's primary key shape is actually known (spec.md §9,
/// "compound pk without derivable default foreign key").
struct PendingBackRef {
    field: String,
    owner: String,
    back_ref_name: String,
    info: BackRefInfo,
    explicit_foreign_key: bool,
}

/// The collection registry and wiring authority for a Keyper application
/// (spec.md §4.4 "DB", §6 "DB surface").
pub struct Db {
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    pending: Mutex<PendingWiring>,
    collection_created: broadcast::Sender<String>,
    collection_defaults: Option<CollectionDefaults>,
}

impl Db {
    pub fn new() -> Arc<Self> {
        let (tx, _) = broadcast::channel(256);
        Arc::new(Db {
            collections: RwLock::new(HashMap::new()),
            pending: Mutex::new(PendingWiring::default()),
            collection_created: tx,
            collection_defaults: None,
        })
    }

    pub fn with_collection_defaults(mut self: Arc<Self>, defaults: CollectionDefaults) -> Arc<Self> {
        Arc::get_mut(&mut self)
            .expect("with_collection_defaults must be called before the Db is shared")
            .collection_defaults = Some(defaults);
        self
    }

    /// Build and register a collection, applying `collection_defaults`, validating
    /// its relation graph, and wiring (or queuing) every back-reference and
    /// parent-child link it declares (spec.md §6, "createCollection").
    pub fn create_collection(
        self: &Arc<Self>,
        name: impl Into<String>,
        config: CollectionConfig,
        source: Arc<dyn DataSource>,
    ) -> Result<Arc<Collection>, DbError> {
        let name = name.into();
        {
            let collections = self.collections.read().unwrap();
            if collections.contains_key(&name) {
                return Err(DbError::DuplicateCollection(name));
            }
        }

        let config = match &self.collection_defaults {
            Some(defaults) => defaults(config),
            None => config,
        };

        if let Some(parent_field) = &config.parent {
            if !config.relations.contains_key(parent_field) {
                return Err(DbError::Wiring {
                    collection: name.clone(),
                    source: CollectionError::ParentNotARelation(parent_field.clone()),
                });
            }
        }

        let collection = Collection::new(name.clone(), config.clone(), source);
        collection.bind_registry(Arc::downgrade(self) as Weak<dyn CollectionRegistry>);

        self.collections.write().unwrap().insert(name.clone(), collection.clone());

        for (field, relation) in &config.relations {
            if let Some(back_ref_name) = &relation.back_ref {
                self.wire_back_ref(&name, field, back_ref_name, relation)?;
            }
        }

        if let Some(parent_field) = &config.parent {
            let relation = &config.relations[parent_field];
            self.wire_parent(&name, &relation.collection)?;
        }

        if let Err(err) = self.apply_pending_for(&name, &collection) {
            self.collections.write().unwrap().remove(&name);
            return Err(err);
        }

        let _ = self.collection_created.send(name);
        Ok(collection)
    }

    fn wire_back_ref(
        &self,
        owner: &str,
        field: &str,
        back_ref_name: &str,
        relation: &keyper_collection::RelationConfig,
    ) -> Result<(), DbError> {
        let fk_field = relation.foreign_key_field(field);
        let target = self.collections.read().unwrap().get(&relation.collection).cloned();
        match target {
            Some(target) => {
                if relation.foreign_key.is_none() && is_compound(&target) {
                    return Err(DbError::Wiring {
                        collection: owner.to_string(),
                        source: CollectionError::CompoundKeyNeedsExplicitForeignKey(field.to_string()),
                    });
                }
                target
                    .register_back_ref(
                        back_ref_name,
                        BackRefInfo {
                            source_collection: owner.to_string(),
                            foreign_key_field: fk_field,
                        },
                    )
                    .map_err(|source| DbError::Wiring {
                        collection: relation.collection.clone(),
                        source,
                    })?;
                tracing::info!(owner, back_ref_name, target = %relation.collection, "wired back-reference");
            }
            None => {
                tracing::debug!(owner, target = %relation.collection, "deferring back-reference wiring until target collection is created");
                self.pending.lock().unwrap().back_refs.entry(relation.collection.clone()).or_default().push(PendingBackRef {
                    field: field.to_string(),
                    owner: owner.to_string(),
                    back_ref_name: back_ref_name.to_string(),
                    info: BackRefInfo {
                        source_collection: owner.to_string(),
                        foreign_key_field: fk_field,
                    },
                    explicit_foreign_key: relation.foreign_key.is_some(),
                });
            }
        }
        Ok(())
    }

    fn wire_parent(&self, child: &str, parent_collection: &str) -> Result<(), DbError> {
        let parent = self.collections.read().unwrap().get(parent_collection).cloned();
        match parent {
            Some(parent) => {
                parent.add_child_collection(child.to_string());
                tracing::info!(child, parent = parent_collection, "wired parent-child link");
            }
            None => {
                tracing::debug!(child, parent = parent_collection, "deferring parent-child wiring until parent collection is created");
                self.pending
                    .lock()
                    .unwrap()
                    .children
                    .entry(parent_collection.to_string())
                    .or_default()
                    .push(child.to_string());
            }
        }
        Ok(())
    }

    /// Apply whatever wiring other, earlier-created collections queued against
    /// `name` now that it exists (spec.md §4.4, "Circular and deferred wiring").
    /// `name`'s primary key shape is only known now, so this is also the first
    /// point at which a queued back-reference's explicit-foreign-key requirement
    /// against a compound target can be checked (spec.md §9, "compound pk without
    /// derivable default foreign key"); the immediate-target path in
    /// `wire_back_ref` checks the same thing as soon as the target already exists.
    fn apply_pending_for(&self, name: &str, collection: &Arc<Collection>) -> Result<(), DbError> {
        let (back_refs, children) = {
            let mut pending = self.pending.lock().unwrap();
            (pending.back_refs.remove(name), pending.children.remove(name))
        };
        for pending_back_ref in back_refs.into_iter().flatten() {
            if !pending_back_ref.explicit_foreign_key && is_compound(collection) {
                return Err(DbError::Wiring {
                    collection: pending_back_ref.owner,
                    source: CollectionError::CompoundKeyNeedsExplicitForeignKey(pending_back_ref.field),
                });
            }
            if let Err(err) = collection.register_back_ref(pending_back_ref.back_ref_name, pending_back_ref.info) {
                tracing::warn!(collection = name, error = %err, "deferred back-reference wiring failed");
            }
        }
        for child in children.into_iter().flatten() {
            collection.add_child_collection(child);
        }
        Ok(())
    }

    pub fn get_collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections.read().unwrap().get(name).cloned()
    }

    pub fn require_collection(&self, name: &str) -> Result<Arc<Collection>, DbError> {
        self.get_collection(name).ok_or_else(|| DbError::UnknownCollection(name.to_string()))
    }

    /// Resolve the collection that produced `entity`, via the hidden collection-
    /// name tag every cached entity carries (spec.md §3, "Entity").
    pub fn get_collection_of(&self, entity: &Entity) -> Option<Arc<Collection>> {
        self.get_collection(entity.collection_name())
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections.read().unwrap().keys().cloned().collect()
    }

    pub fn collection_created(&self) -> broadcast::Receiver<String> {
        self.collection_created.subscribe()
    }
}

impl CollectionRegistry for Db {
    fn collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.get_collection(name)
    }
}

fn is_compound(collection: &Collection) -> bool {
    matches!(collection.config().primary_key, keyper_core::PrimaryKeyFields::Compound(_))
}
