//! Test fixtures

use std::sync::Arc;

use searchstore::{
    AliasIndexRouter, ArchiveMigrator, Document, DualModeRouter, InMemoryEngine, IndexCrud,
    StoreConfig,
};
use serde_json::{json, Value};

/// JSON object literal as a document
pub fn doc(value: Value) -> Document {
    value.as_object().cloned().expect("fixture documents are objects")
}

/// `n`-th test entity: alternating widget/gadget kinds
pub fn thing(n: usize) -> Document {
    doc(json!({
        "name": format!("thing-{n}"),
        "n": n,
        "kind": if n % 2 == 0 { "widget" } else { "gadget" },
    }))
}

pub fn ids(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| format!("id-{i:04}")).collect()
}

/// In-memory engine and a router over it
pub struct Harness {
    pub engine: InMemoryEngine,
    pub router: Arc<DualModeRouter>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        let engine = InMemoryEngine::new();
        let router = Arc::new(DualModeRouter::new(
            Arc::new(engine.clone()),
            Arc::new(config),
        ));
        Self { engine, router }
    }

    pub fn crud(&self, index: &str) -> IndexCrud {
        IndexCrud::new(Arc::clone(&self.router), index)
    }

    pub fn alias_router(&self, alias: &str) -> AliasIndexRouter {
        AliasIndexRouter::new(Arc::clone(&self.router), Arc::new(self.engine.clone()), alias)
    }

    pub fn migrator(&self, alias: &str) -> ArchiveMigrator {
        ArchiveMigrator::new(self.alias_router(alias))
    }

    /// `{alias}-live` (write) and `{alias}-archive` behind `alias`
    pub fn live_and_archive(&self, alias: &str) -> (String, String) {
        let live = format!("{alias}-live");
        let archive = format!("{alias}-archive");
        self.engine.create_index(&live, &json!({})).expect("create live");
        self.engine
            .create_index(&archive, &json!({}))
            .expect("create archive");
        self.engine.add_alias(&live, alias, true).expect("alias live");
        self.engine
            .add_alias(&archive, alias, false)
            .expect("alias archive");
        (live, archive)
    }
}
