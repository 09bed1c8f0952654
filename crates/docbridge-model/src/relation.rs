//! Relation descriptors between model types
//!
//! A relation is bound to the owning instance's key value at the time it is
//! built. Related model types are generic parameters, relation names are
//! passed explicitly by the accessor that builds them.

use std::marker::PhantomData;
use std::sync::Arc;

use bson::{Bson, Document as BsonDocument};

use crate::definition::ModelDefinition;
use crate::model::Model;
use crate::query::ModelQuery;
use crate::Result;
use docbridge_common::BridgeError;
use docbridge_query::Connection;

/// Kind of edge between two models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    BelongsTo,
    HasOne,
    HasMany,
    EmbedsMany,
}

/// A referenced relation (`belongs_to`, `has_one`, `has_many`).
pub struct Relation<R: ModelDefinition> {
    name: String,
    kind: RelationKind,
    conn: Arc<dyn Connection>,
    foreign_key: String,
    /// Owner key on the related model for belongs-to, local key on the parent otherwise
    local_key: String,
    parent_value: Option<Bson>,
    _related: PhantomData<fn() -> R>,
}

impl<R: ModelDefinition> std::fmt::Debug for Relation<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relation")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("related", &R::NAME)
            .field("foreign_key", &self.foreign_key)
            .field("local_key", &self.local_key)
            .field("parent_value", &self.parent_value)
            .finish()
    }
}

impl<R: ModelDefinition> Relation<R> {
    pub(crate) fn new(
        name: &str,
        kind: RelationKind,
        conn: Arc<dyn Connection>,
        foreign_key: String,
        local_key: String,
        parent_value: Option<Bson>,
    ) -> Self {
        let parent_value = parent_value.filter(|v| !matches!(v, Bson::Null));
        Self {
            name: name.to_string(),
            kind,
            conn,
            foreign_key,
            local_key,
            parent_value,
            _related: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    pub fn local_key(&self) -> &str {
        &self.local_key
    }

    /// Alias of `local_key` for belongs-to relations
    pub fn owner_key(&self) -> &str {
        &self.local_key
    }

    /// Field on the related model that is matched against the parent value
    fn related_field(&self) -> &str {
        match self.kind {
            RelationKind::BelongsTo => &self.local_key,
            _ => &self.foreign_key,
        }
    }

    /// Query for the related models.
    ///
    /// Without a parent value the query matches nothing.
    pub fn query(&self) -> Result<ModelQuery<R>> {
        let query = ModelQuery::<R>::new(Arc::clone(&self.conn))?;
        match &self.parent_value {
            Some(value) => query.where_eq(self.related_field(), value.clone()),
            None => query.where_in(self.related_field(), Vec::<Bson>::new()),
        }
    }

    pub async fn get(&self) -> Result<Vec<Model<R>>> {
        if self.parent_value.is_none() {
            return Ok(Vec::new());
        }
        self.query()?.get().await
    }

    pub async fn first(&self) -> Result<Option<Model<R>>> {
        if self.parent_value.is_none() {
            return Ok(None);
        }
        self.query()?.first().await
    }

    /// Create a related model pointing at the parent (has-one and has-many)
    pub async fn create(&self, attributes: BsonDocument) -> Result<Model<R>> {
        if self.kind == RelationKind::BelongsTo {
            return Err(BridgeError::Constraint(format!(
                "Relation '{}' is belongs-to; create the owner and associate it instead",
                self.name
            )));
        }
        let value = self.parent_value.clone().ok_or_else(|| {
            BridgeError::Constraint(format!(
                "Relation '{}' needs a saved parent with '{}' set",
                self.name, self.local_key
            ))
        })?;

        let mut model = Model::<R>::with_attributes(Arc::clone(&self.conn), attributes)?;
        model.set_attribute(&self.foreign_key, value)?;
        model.save().await?;
        Ok(model)
    }
}

/// Related documents stored inside the parent document.
pub struct EmbedsMany<R: ModelDefinition> {
    name: String,
    conn: Arc<dyn Connection>,
    local_key: String,
    items: Vec<BsonDocument>,
    malformed: bool,
    _related: PhantomData<fn() -> R>,
}

impl<R: ModelDefinition> std::fmt::Debug for EmbedsMany<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbedsMany")
            .field("name", &self.name)
            .field("related", &R::NAME)
            .field("local_key", &self.local_key)
            .field("items", &self.items.len())
            .finish()
    }
}

impl<R: ModelDefinition> EmbedsMany<R> {
    pub(crate) fn new(
        name: &str,
        conn: Arc<dyn Connection>,
        local_key: String,
        stored: Option<Bson>,
    ) -> Self {
        let (items, malformed) = match stored {
            None | Some(Bson::Null) => (Vec::new(), false),
            Some(Bson::Array(values)) => {
                let total = values.len();
                let items: Vec<BsonDocument> = values
                    .into_iter()
                    .filter_map(|v| match v {
                        Bson::Document(d) => Some(d),
                        _ => None,
                    })
                    .collect();
                let malformed = items.len() != total;
                (items, malformed)
            }
            Some(_) => (Vec::new(), true),
        };
        Self {
            name: name.to_string(),
            conn,
            local_key,
            items,
            malformed,
            _related: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RelationKind {
        RelationKind::EmbedsMany
    }

    pub fn local_key(&self) -> &str {
        &self.local_key
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Hydrate the embedded documents
    pub fn get(&self) -> Result<Vec<Model<R>>> {
        if self.malformed {
            return Err(BridgeError::Hydration(format!(
                "Field '{}' does not hold an array of embedded {} documents",
                self.local_key,
                R::NAME
            )));
        }
        self.items
            .iter()
            .map(|doc| Model::new_from_builder(Arc::clone(&self.conn), doc.clone()))
            .collect()
    }

    pub fn first(&self) -> Result<Option<Model<R>>> {
        Ok(self.get()?.into_iter().next())
    }

    /// Embed `child` into `parent`, replacing an entry with the same key.
    ///
    /// The parent is only changed in memory; save it to persist.
    pub fn associate<D: ModelDefinition>(&mut self, parent: &mut Model<D>, child: &Model<R>) -> Result<()> {
        if self.malformed {
            return Err(BridgeError::Hydration(format!(
                "Field '{}' does not hold an array of embedded {} documents",
                self.local_key,
                R::NAME
            )));
        }

        let embedded = child.attributes().clone();
        let position = child.get_key().and_then(|key| {
            self.items
                .iter()
                .position(|item| item.get(R::key_name()) == Some(key))
        });
        match position {
            Some(i) => self.items[i] = embedded,
            None => self.items.push(embedded),
        }

        let array: Vec<Bson> = self.items.iter().cloned().map(Bson::Document).collect();
        parent.set_attribute(&self.local_key, Bson::Array(array))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docbridge_query::MemoryConnection;

    struct Author;

    impl ModelDefinition for Author {
        const NAME: &'static str = "Author";
    }

    struct Post;

    impl ModelDefinition for Post {
        const NAME: &'static str = "Post";
    }

    struct Comment;

    impl ModelDefinition for Comment {
        const NAME: &'static str = "Comment";

        fn timestamps() -> bool {
            false
        }
    }

    fn memory() -> (Arc<MemoryConnection>, Arc<dyn Connection>) {
        let mem = Arc::new(MemoryConnection::new());
        let conn: Arc<dyn Connection> = mem.clone();
        (mem, conn)
    }

    #[test]
    fn test_belongs_to_defaults() {
        let (_, conn) = memory();
        let post = Model::<Post>::with_attributes(conn, doc! { "author_id": 7 }).unwrap();
        let author = post.belongs_to::<Author>("author", None, None);
        assert_eq!(author.name(), "author");
        assert_eq!(author.kind(), RelationKind::BelongsTo);
        assert_eq!(author.foreign_key(), "author_id");
        assert_eq!(author.owner_key(), "id");
    }

    #[test]
    fn test_belongs_to_custom_owner_key_keeps_id_suffix() {
        struct Product;

        impl ModelDefinition for Product {
            const NAME: &'static str = "Product";

            fn key_name() -> &'static str {
                "sku"
            }
        }

        let (_, conn) = memory();
        let post = Model::<Post>::new(conn);
        let product = post.belongs_to::<Product>("featuredProduct", None, None);
        assert_eq!(product.foreign_key(), "featured_product_id");
        assert_eq!(product.owner_key(), "sku");
        assert_eq!(Product::foreign_key(), "product_id");
    }

    #[test]
    fn test_has_many_defaults() {
        let (_, conn) = memory();
        let author = Model::<Author>::new_from_builder(conn, doc! { "id": 3 }).unwrap();
        let posts = author.has_many::<Post>("posts", None, None);
        assert_eq!(posts.foreign_key(), "author_id");
        assert_eq!(posts.local_key(), "id");

        let custom = author.has_one::<Post>("pinned", Some("writer_id"), Some("uuid"));
        assert_eq!(custom.kind(), RelationKind::HasOne);
        assert_eq!(custom.foreign_key(), "writer_id");
        assert_eq!(custom.local_key(), "uuid");
    }

    #[tokio::test]
    async fn test_belongs_to_resolves_owner() {
        let (mem, conn) = memory();
        mem.seed("authors", vec![doc! { "_id": 7, "name": "ada" }]);
        let post = Model::<Post>::with_attributes(conn, doc! { "author_id": 7 }).unwrap();
        let author = post
            .belongs_to::<Author>("author", None, None)
            .first()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(author.get("name"), Some(&Bson::String("ada".into())));
    }

    #[tokio::test]
    async fn test_missing_parent_value_matches_nothing() {
        let (mem, conn) = memory();
        mem.seed("authors", vec![doc! { "_id": 7 }]);
        let post = Model::<Post>::new(conn);
        let relation = post.belongs_to::<Author>("author", None, None);
        assert!(relation.get().await.unwrap().is_empty());
        assert_eq!(mem.read_count(), 0);
        assert_eq!(relation.query().unwrap().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_has_many_create_and_get() {
        let (_, conn) = memory();
        let mut author = Model::<Author>::with_attributes(conn, doc! { "name": "ada" }).unwrap();
        author.save().await.unwrap();

        let posts = author.has_many::<Post>("posts", None, None);
        let post = posts.create(doc! { "title": "notes" }).await.unwrap();
        assert_eq!(post.get("author_id"), author.get_key());

        let fetched = posts.get().await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].get("title"), Some(&Bson::String("notes".into())));

        let belongs = post.belongs_to::<Author>("author", None, None);
        assert!(belongs.create(doc! {}).await.unwrap_err().is_constraint_error());
    }

    #[test]
    fn test_has_one_returns_first_match() {
        let (mem, conn) = memory();
        mem.seed(
            "posts",
            vec![
                doc! { "_id": 1, "author_id": 9, "title": "older" },
                doc! { "_id": 2, "author_id": 9, "title": "newer" },
            ],
        );
        let author = Model::<Author>::new_from_builder(conn, doc! { "id": 9 }).unwrap();
        let pinned = tokio_test::block_on(author.has_one::<Post>("pinned", None, None).first())
            .unwrap()
            .unwrap();
        assert_eq!(pinned.get_key(), Some(&Bson::Int32(1)));
    }

    #[test]
    fn test_embeds_many_get_and_associate() {
        let (_, conn) = memory();
        let mut post = Model::<Post>::new_from_builder(
            conn.clone(),
            doc! { "id": 1, "comments": [{ "id": 1, "body": "first" }] },
        )
        .unwrap();

        let mut comments = post.embeds_many::<Comment>("comments", None);
        assert_eq!(comments.len(), 1);
        assert_eq!(comments.first().unwrap().unwrap().get("body"), Some(&Bson::String("first".into())));

        let reply = Model::<Comment>::with_attributes(conn.clone(), doc! { "id": 2, "body": "second" }).unwrap();
        comments.associate(&mut post, &reply).unwrap();
        let edited = Model::<Comment>::with_attributes(conn, doc! { "id": 1, "body": "edited" }).unwrap();
        comments.associate(&mut post, &edited).unwrap();

        assert_eq!(
            post.get("comments"),
            Some(&Bson::Array(vec![
                Bson::Document(doc! { "id": 1, "body": "edited" }),
                Bson::Document(doc! { "id": 2, "body": "second" }),
            ]))
        );
        assert!(post.is_dirty_field("comments"));
    }

    #[test]
    fn test_embeds_many_rejects_non_documents() {
        let (_, conn) = memory();
        let post = Model::<Post>::new_from_builder(conn, doc! { "id": 1, "comments": "none" }).unwrap();
        let comments = post.embeds_many::<Comment>("comments", None);
        assert!(matches!(comments.get().unwrap_err(), BridgeError::Hydration(_)));
    }
}
