//! Model instances and their persistence pipelines
//!
//! A [`Model`] owns two attribute sets: the current attributes and the
//! original ones captured at load or save time. Persistence goes through the
//! builder matching the connection's dialect, with lifecycle hooks fired
//! around each operation.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bson::{Bson, Document as BsonDocument};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::dates::{as_date_time, fresh_timestamp, from_date_time};
use crate::definition::{date_fields, field_kind, is_date_field, snake_case, ModelDefinition};
use crate::dirty::original_is_equivalent;
use crate::events::{Hooks, ModelEvent};
use crate::query::{builder_for, ModelQuery};
use crate::relation::{EmbedsMany, Relation, RelationKind};
use crate::Result;
use docbridge_common::BridgeError;
use docbridge_query::{Connection, QueryBuilder, QuerySpec, ValidatedFieldName};

/// One document of model type `D`.
pub struct Model<D: ModelDefinition> {
    conn: Arc<dyn Connection>,
    attributes: BsonDocument,
    original: BsonDocument,
    exists: bool,
    was_recently_created: bool,
    hooks: Arc<Hooks<D>>,
    _definition: PhantomData<fn() -> D>,
}

impl<D: ModelDefinition> Clone for Model<D> {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            attributes: self.attributes.clone(),
            original: self.original.clone(),
            exists: self.exists,
            was_recently_created: self.was_recently_created,
            hooks: Arc::clone(&self.hooks),
            _definition: PhantomData,
        }
    }
}

impl<D: ModelDefinition> fmt::Debug for Model<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(D::NAME)
            .field("attributes", &self.attributes)
            .field("exists", &self.exists)
            .field("was_recently_created", &self.was_recently_created)
            .finish()
    }
}

impl<D: ModelDefinition> Model<D> {
    /// New, unsaved instance
    pub fn new(conn: Arc<dyn Connection>) -> Self {
        Self {
            conn,
            attributes: BsonDocument::new(),
            original: BsonDocument::new(),
            exists: false,
            was_recently_created: false,
            hooks: Arc::new(D::hooks()),
            _definition: PhantomData,
        }
    }

    /// New, unsaved instance with attributes filled in
    pub fn with_attributes(conn: Arc<dyn Connection>, attributes: BsonDocument) -> Result<Self> {
        let mut model = Self::new(conn);
        model.fill(attributes)?;
        Ok(model)
    }

    /// Hydrate a stored document.
    ///
    /// Every date field is checked eagerly, so a document with an unreadable
    /// date fails here instead of on first access.
    pub fn new_from_builder(conn: Arc<dyn Connection>, raw: BsonDocument) -> Result<Self> {
        for field in date_fields::<D>() {
            match raw.get(field) {
                None | Some(Bson::Null) => {}
                Some(value) => {
                    as_date_time(value, D::date_format()).map_err(|e| {
                        BridgeError::Hydration(format!("{}.{}: {}", D::NAME, field, e))
                    })?;
                }
            }
        }

        let mut model = Self::new(conn);
        model.original = raw.clone();
        model.attributes = raw;
        model.exists = true;
        Ok(model)
    }

    /// Query over this model's collection
    pub fn query(conn: Arc<dyn Connection>) -> Result<ModelQuery<D>> {
        ModelQuery::new(conn)
    }

    /// Query sharing this instance's connection
    pub fn new_query(&self) -> Result<ModelQuery<D>> {
        ModelQuery::new(Arc::clone(&self.conn))
    }

    /// Builder for the connection's dialect
    pub fn new_query_builder(&self) -> Box<dyn QueryBuilder> {
        builder_for::<D>(&self.conn)
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn was_recently_created(&self) -> bool {
        self.was_recently_created
    }

    pub fn attributes(&self) -> &BsonDocument {
        &self.attributes
    }

    pub fn original(&self) -> &BsonDocument {
        &self.original
    }

    pub fn key_name(&self) -> &'static str {
        D::key_name()
    }

    /// Primary key value, if set
    pub fn get_key(&self) -> Option<&Bson> {
        match self.attributes.get(D::key_name()) {
            None | Some(Bson::Null) => None,
            Some(key) => Some(key),
        }
    }

    /// Raw attribute value
    pub fn get(&self, field: &str) -> Option<&Bson> {
        self.attributes.get(field)
    }

    /// Read a date field as a canonical timestamp. `null` and missing are `None`.
    pub fn get_date(&self, field: &str) -> Result<Option<DateTime<Utc>>> {
        match self.attributes.get(field) {
            None | Some(Bson::Null) => Ok(None),
            Some(value) => as_date_time(value, D::date_format()).map(Some),
        }
    }

    /// Set an attribute. Date fields are stored in the connection's date form.
    pub fn set_attribute(&mut self, field: &str, value: impl Into<Bson>) -> Result<()> {
        let field = ValidatedFieldName::new(field)?.into_string();
        let value = value.into();

        let value = if is_date_field::<D>(&field) && !matches!(value, Bson::Null) {
            self.serialize_date(as_date_time(&value, D::date_format())?)
        } else {
            value
        };

        self.attributes.insert(field, value);
        Ok(())
    }

    pub fn set_date(&mut self, field: &str, value: DateTime<Utc>) -> Result<()> {
        self.set_attribute(field, Bson::DateTime(bson::DateTime::from_chrono(value)))
    }

    /// Set several attributes
    pub fn fill(&mut self, attributes: BsonDocument) -> Result<()> {
        for (field, value) in attributes {
            self.set_attribute(&field, value)?;
        }
        Ok(())
    }

    pub fn unset(&mut self, field: &str) -> Option<Bson> {
        self.attributes.remove(field)
    }

    /// Deserialize the attributes into a typed value
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(bson::from_document(self.attributes.clone())?)
    }

    fn serialize_date(&self, value: DateTime<Utc>) -> Bson {
        from_date_time(value, D::date_format(), self.conn.supports_native_dates())
    }

    /// Whether a field's current value matches its original
    pub fn original_is_equivalent(&self, field: &str) -> bool {
        original_is_equivalent(
            field_kind::<D>(field),
            self.attributes.get(field),
            self.original.get(field),
            D::date_format(),
        )
    }

    /// Attributes that changed since load or the last save
    pub fn get_dirty(&self) -> BsonDocument {
        let mut dirty = BsonDocument::new();
        for (field, value) in &self.attributes {
            if !self.original_is_equivalent(field) {
                dirty.insert(field.clone(), value.clone());
            }
        }
        dirty
    }

    pub fn is_dirty(&self) -> bool {
        self.attributes
            .keys()
            .any(|field| !self.original_is_equivalent(field))
    }

    pub fn is_dirty_field(&self, field: &str) -> bool {
        !self.original_is_equivalent(field)
    }

    pub fn sync_original(&mut self) {
        self.original = self.attributes.clone();
    }

    /// Register a hook on this instance only
    pub fn listen<F>(&mut self, event: ModelEvent, hook: F)
    where
        F: Fn(&mut Model<D>) -> bool + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.hooks).push(event, Arc::new(hook));
    }

    fn fire(&mut self, event: ModelEvent) -> bool {
        let hooks = Arc::clone(&self.hooks);
        let allowed = hooks.fire(event, self);
        if !allowed {
            debug!(model = D::NAME, event = %event, "operation vetoed by hook");
        }
        allowed
    }

    /// Stamp `updated_at`, and `created_at` on unsaved models
    pub fn update_timestamps(&mut self) {
        let now = self.serialize_date(fresh_timestamp());
        if !self.is_dirty_field(D::UPDATED_AT) {
            self.attributes.insert(D::UPDATED_AT, now.clone());
        }
        if !self.exists && !self.is_dirty_field(D::CREATED_AT) {
            self.attributes.insert(D::CREATED_AT, now);
        }
    }

    /// Refresh `updated_at` and save. Returns `false` without timestamps.
    pub async fn touch(&mut self) -> Result<bool> {
        if !D::timestamps() {
            return Ok(false);
        }
        let now = self.serialize_date(fresh_timestamp());
        self.attributes.insert(D::UPDATED_AT, now);
        self.save().await
    }

    /// Insert or update, firing `saving` and `saved`.
    #[instrument(skip(self), fields(model = D::NAME, exists = self.exists))]
    pub async fn save(&mut self) -> Result<bool> {
        if !self.fire(ModelEvent::Saving) {
            return Ok(false);
        }

        let saved = if self.exists {
            self.perform_update().await?
        } else {
            self.perform_insert().await?
        };

        if saved {
            self.fire(ModelEvent::Saved);
            self.sync_original();
        }
        Ok(saved)
    }

    /// Insert pipeline.
    ///
    /// `exists` is set before `created` fires, so a hook that saves again
    /// performs an update.
    pub async fn perform_insert(&mut self) -> Result<bool> {
        if !self.fire(ModelEvent::Creating) {
            return Ok(false);
        }

        if D::timestamps() {
            self.update_timestamps();
        }

        if D::incrementing() {
            self.insert_and_set_id().await?;
        } else if self.attributes.is_empty() {
            debug!(model = D::NAME, "empty non-incrementing insert skipped");
            return Ok(true);
        } else {
            if self.get_key().is_none() {
                return Err(BridgeError::Constraint(format!(
                    "{} requires '{}' before insert",
                    D::NAME,
                    D::key_name()
                )));
            }
            self.insert_and_set_id().await?;
        }

        self.exists = true;
        self.was_recently_created = true;
        self.sync_original();

        self.fire(ModelEvent::Created);
        Ok(true)
    }

    async fn insert_and_set_id(&mut self) -> Result<()> {
        let mut values = self.attributes.clone();
        if matches!(values.get(D::key_name()), Some(Bson::Null)) {
            values.remove(D::key_name());
        }

        let id = self
            .new_query_builder()
            .insert_get_id(&D::collection(), values)
            .await?;
        debug!(model = D::NAME, id = %id, "key assigned");
        self.attributes.insert(D::key_name(), id);
        Ok(())
    }

    /// Update pipeline: only dirty attributes are written.
    pub async fn perform_update(&mut self) -> Result<bool> {
        if !self.fire(ModelEvent::Updating) {
            return Ok(false);
        }

        if D::timestamps() && self.is_dirty() {
            self.update_timestamps();
        }

        let dirty = self.get_dirty();
        if dirty.is_empty() {
            debug!(model = D::NAME, "nothing dirty, update skipped");
            return Ok(true);
        }

        let spec = self.key_spec()?;
        self.new_query_builder().update(spec, dirty).await?;
        self.sync_original();

        self.fire(ModelEvent::Updated);
        Ok(true)
    }

    /// Delete by key. Returns `false` for unsaved models or on veto.
    #[instrument(skip(self), fields(model = D::NAME))]
    pub async fn delete(&mut self) -> Result<bool> {
        if !self.exists {
            return Ok(false);
        }
        if !self.fire(ModelEvent::Deleting) {
            return Ok(false);
        }

        let spec = self.key_spec()?;
        self.new_query_builder().delete(spec).await?;
        self.exists = false;

        self.fire(ModelEvent::Deleted);
        Ok(true)
    }

    fn key_spec(&self) -> Result<QuerySpec> {
        let key = self.get_key().cloned().ok_or_else(|| {
            BridgeError::Constraint(format!("{} has no '{}' value", D::NAME, D::key_name()))
        })?;
        QuerySpec::new(&D::collection())?.where_eq(D::key_name(), key)
    }

    /// Inverse side of a one-to-one or one-to-many edge.
    ///
    /// Foreign key defaults to `<relation name>_id`, owner key to the related
    /// model's key.
    pub fn belongs_to<R: ModelDefinition>(
        &self,
        name: &str,
        foreign_key: Option<&str>,
        owner_key: Option<&str>,
    ) -> Relation<R> {
        let foreign_key = foreign_key
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}_id", snake_case(name)));
        let owner_key = owner_key.unwrap_or(R::key_name()).to_string();
        let value = self.attributes.get(&foreign_key).cloned();
        Relation::new(
            name,
            RelationKind::BelongsTo,
            Arc::clone(&self.conn),
            foreign_key,
            owner_key,
            value,
        )
    }

    /// Foreign key defaults to this model's `foreign_key()`, local key to its key.
    pub fn has_one<R: ModelDefinition>(
        &self,
        name: &str,
        foreign_key: Option<&str>,
        local_key: Option<&str>,
    ) -> Relation<R> {
        self.has_relation(name, RelationKind::HasOne, foreign_key, local_key)
    }

    pub fn has_many<R: ModelDefinition>(
        &self,
        name: &str,
        foreign_key: Option<&str>,
        local_key: Option<&str>,
    ) -> Relation<R> {
        self.has_relation(name, RelationKind::HasMany, foreign_key, local_key)
    }

    fn has_relation<R: ModelDefinition>(
        &self,
        name: &str,
        kind: RelationKind,
        foreign_key: Option<&str>,
        local_key: Option<&str>,
    ) -> Relation<R> {
        let foreign_key = foreign_key.map(str::to_string).unwrap_or_else(D::foreign_key);
        let local_key = local_key.unwrap_or(D::key_name()).to_string();
        let value = self.attributes.get(&local_key).cloned();
        Relation::new(name, kind, Arc::clone(&self.conn), foreign_key, local_key, value)
    }

    /// Documents embedded in this model under `local_key` (default: the relation name)
    pub fn embeds_many<R: ModelDefinition>(&self, name: &str, local_key: Option<&str>) -> EmbedsMany<R> {
        let local_key = local_key.unwrap_or(name).to_string();
        let items = self.attributes.get(&local_key).cloned();
        EmbedsMany::new(name, Arc::clone(&self.conn), local_key, items)
    }

    pub(crate) fn set_raw(&mut self, field: &str, value: Bson) {
        self.attributes.insert(field, value);
    }
}
