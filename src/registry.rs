//! Document registry.
//! The list of known apps is itself a remote JSON document (an ordered
//! array) synced with the same machinery as any config file. Every list
//! mutation is a local edit followed immediately by a save of the whole
//! list; there is no separate dirty state. List order is insertion order
//! and is never sorted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::model::{ConfigDocument, str_field};
use crate::store::{FileLocation, RemoteStore};
use crate::sync::{DocState, DocSync, Document};

pub const DEFAULT_BRANCH: &str = "main";

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

/// One registered app: where its config file lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppItem {
    pub name: String,
    pub repo: String,
    pub path: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

impl AppItem {
    pub fn location(&self) -> FileLocation {
        FileLocation::new(&self.repo, &self.path, &self.branch)
    }

    fn normalized(raw: &Value) -> Self {
        let branch = match raw.get("branch").and_then(Value::as_str) {
            Some(branch) if !branch.is_empty() => branch.to_string(),
            _ => default_branch(),
        };
        AppItem {
            name: str_field(raw, "name"),
            repo: str_field(raw, "repo"),
            path: str_field(raw, "path"),
            branch,
        }
    }
}

/// The registry list as stored on the remote: a plain ordered array.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AppList(pub Vec<AppItem>);

impl Document for AppList {
    fn from_remote(value: &Value) -> Self {
        let items = value
            .as_array()
            .map(|entries| entries.iter().map(AppItem::normalized).collect())
            .unwrap_or_default();
        AppList(items)
    }

    fn to_remote(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Holds the app list plus the currently-selected app's config document,
/// each behind its own sync state machine.
pub struct Registry {
    loc: FileLocation,
    list: DocSync<AppList>,
    selected: Option<usize>,
    doc: DocSync<ConfigDocument>,
}

impl Registry {
    pub fn new(loc: FileLocation) -> Self {
        Registry {
            loc,
            list: DocSync::new(),
            selected: None,
            doc: DocSync::new(),
        }
    }

    /// Loads the list; a missing list file is created empty on the spot.
    pub async fn ensure_list(&mut self, store: &dyn RemoteStore) -> Result<()> {
        self.list.load(store, &self.loc).await?;
        if matches!(self.list.state(), DocState::Missing) {
            self.list
                .create(store, &self.loc, "initialize app list")
                .await?;
        }
        Ok(())
    }

    pub fn apps(&self) -> &[AppItem] {
        self.list
            .document()
            .map(|list| list.0.as_slice())
            .unwrap_or(&[])
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.apps().iter().position(|app| app.name == name)
    }

    async fn save_list(&mut self, store: &dyn RemoteStore, message: &str) -> Result<()> {
        self.list.save(store, &self.loc, message).await
    }

    pub async fn add(&mut self, store: &dyn RemoteStore, item: AppItem) -> Result<()> {
        if self.find(&item.name).is_some() {
            return Err(SyncError::validation(
                "name",
                format!("an app named '{}' already exists", item.name),
            ));
        }
        let message = format!("add app {}", item.name);
        self.list.edit(|list| list.0.push(item))?;
        self.save_list(store, &message).await
    }

    pub async fn remove(&mut self, store: &dyn RemoteStore, name: &str) -> Result<()> {
        let index = self.find(name).ok_or_else(|| SyncError::UnknownApp {
            name: name.to_string(),
        })?;
        self.list.edit(|list| {
            list.0.remove(index);
        })?;
        // Selection tracks positions, not names
        match self.selected {
            Some(selected) if selected == index => {
                self.selected = None;
                self.doc.reset();
            }
            Some(selected) if selected > index => self.selected = Some(selected - 1),
            _ => {}
        }
        self.save_list(store, &format!("remove app {}", name)).await
    }

    pub async fn rename(&mut self, store: &dyn RemoteStore, from: &str, to: &str) -> Result<()> {
        if self.find(to).is_some() {
            return Err(SyncError::validation(
                "name",
                format!("an app named '{}' already exists", to),
            ));
        }
        let index = self.find(from).ok_or_else(|| SyncError::UnknownApp {
            name: from.to_string(),
        })?;
        self.list.edit(|list| list.0[index].name = to.to_string())?;
        self.save_list(store, &format!("rename app {} to {}", from, to))
            .await
    }

    /// Selects an app and resets its document sync state. The reset bumps
    /// the generation, so a response still in flight for the previous
    /// selection is discarded instead of applied to the new one.
    pub fn select(&mut self, name: &str) -> Result<()> {
        let index = self.find(name).ok_or_else(|| SyncError::UnknownApp {
            name: name.to_string(),
        })?;
        self.selected = Some(index);
        self.doc.reset();
        Ok(())
    }

    pub fn selected(&self) -> Option<&AppItem> {
        self.selected.and_then(|index| self.apps().get(index))
    }

    fn selected_location(&self) -> Result<FileLocation> {
        self.selected()
            .map(AppItem::location)
            .ok_or_else(|| SyncError::State("no app selected".to_string()))
    }

    pub async fn load_selected(&mut self, store: &dyn RemoteStore) -> Result<()> {
        let loc = self.selected_location()?;
        self.doc.load(store, &loc).await
    }

    pub async fn create_selected(&mut self, store: &dyn RemoteStore) -> Result<()> {
        let loc = self.selected_location()?;
        let message = format!("create {}", loc.path);
        self.doc.create(store, &loc, &message).await
    }

    pub fn edit_selected(&mut self, mutate: impl FnOnce(&mut ConfigDocument)) -> Result<()> {
        self.doc.edit(mutate)
    }

    pub async fn save_selected(&mut self, store: &dyn RemoteStore, message: &str) -> Result<()> {
        let loc = self.selected_location()?;
        self.doc.save(store, &loc, message).await
    }

    pub fn document(&self) -> Option<&ConfigDocument> {
        self.doc.document()
    }

    pub fn doc_state(&self) -> &DocState<ConfigDocument> {
        self.doc.state()
    }

    /// The version token observed with the selected document, if loaded.
    pub fn document_sha(&self) -> Option<&str> {
        self.doc.sha()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Vip;
    use crate::store::testing::MemoryStore;

    fn list_loc() -> FileLocation {
        FileLocation::new("o/r", "configs/apps.json", "main")
    }

    fn item(name: &str, path: &str) -> AppItem {
        AppItem {
            name: name.to_string(),
            repo: "o/r".to_string(),
            path: path.to_string(),
            branch: DEFAULT_BRANCH.to_string(),
        }
    }

    #[tokio::test]
    async fn test_ensure_list_creates_missing_list() {
        let store = MemoryStore::new();
        let mut registry = Registry::new(list_loc());

        registry.ensure_list(&store).await.unwrap();
        assert!(registry.apps().is_empty());
        assert_eq!(store.text_of(&list_loc()).unwrap(), "[]");
    }

    #[tokio::test]
    async fn test_list_read_is_tolerant() {
        let store = MemoryStore::new();
        store.seed(&list_loc(), r#"{"not": "an array"}"#);
        let mut registry = Registry::new(list_loc());

        registry.ensure_list(&store).await.unwrap();
        assert!(registry.apps().is_empty());
    }

    #[tokio::test]
    async fn test_branch_defaults_to_main() {
        let store = MemoryStore::new();
        store.seed(
            &list_loc(),
            r#"[{"name":"QQ","repo":"o/r","path":"configs/qq.json"}]"#,
        );
        let mut registry = Registry::new(list_loc());

        registry.ensure_list(&store).await.unwrap();
        assert_eq!(registry.apps()[0].branch, "main");
    }

    #[tokio::test]
    async fn test_add_saves_list_immediately() {
        let store = MemoryStore::new();
        let mut registry = Registry::new(list_loc());
        registry.ensure_list(&store).await.unwrap();

        registry.add(&store, item("QQ", "configs/qq.json")).await.unwrap();

        let text = store.text_of(&list_loc()).unwrap();
        assert!(text.contains("\"name\": \"QQ\""));
        assert!(text.contains("\"branch\": \"main\""));

        // Duplicate names are rejected locally, before any write
        let result = registry.add(&store, item("QQ", "configs/other.json")).await;
        assert!(matches!(result, Err(SyncError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_remove_fixes_selection() {
        let store = MemoryStore::new();
        let mut registry = Registry::new(list_loc());
        registry.ensure_list(&store).await.unwrap();
        registry.add(&store, item("A", "a.json")).await.unwrap();
        registry.add(&store, item("B", "b.json")).await.unwrap();

        registry.select("B").unwrap();
        registry.remove(&store, "A").await.unwrap();
        assert_eq!(registry.selected().unwrap().name, "B");

        registry.remove(&store, "B").await.unwrap();
        assert!(registry.selected().is_none());
        assert_eq!(store.text_of(&list_loc()).unwrap(), "[]");
    }

    #[tokio::test]
    async fn test_rename_preserves_order_and_saves() {
        let store = MemoryStore::new();
        let mut registry = Registry::new(list_loc());
        registry.ensure_list(&store).await.unwrap();
        registry.add(&store, item("A", "a.json")).await.unwrap();
        registry.add(&store, item("B", "b.json")).await.unwrap();

        registry.rename(&store, "A", "C").await.unwrap();
        let names: Vec<&str> = registry.apps().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["C", "B"]);
        assert!(store.text_of(&list_loc()).unwrap().contains("\"C\""));

        assert!(matches!(
            registry.rename(&store, "missing", "X").await,
            Err(SyncError::UnknownApp { .. })
        ));
        assert!(matches!(
            registry.rename(&store, "C", "B").await,
            Err(SyncError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_select_unknown_app() {
        let store = MemoryStore::new();
        let mut registry = Registry::new(list_loc());
        registry.ensure_list(&store).await.unwrap();
        assert!(matches!(
            registry.select("ghost"),
            Err(SyncError::UnknownApp { .. })
        ));
    }

    #[tokio::test]
    async fn test_end_to_end_edit_flow() {
        let store = MemoryStore::new();
        store.seed(
            &list_loc(),
            r#"[{"name":"QQ","repo":"o/r","path":"configs/qq.json"}]"#,
        );
        let config_loc = FileLocation::new("o/r", "configs/qq.json", "main");
        store.seed(&config_loc, r#"{"title":"Hi"}"#);

        let mut registry = Registry::new(list_loc());
        registry.ensure_list(&store).await.unwrap();
        registry.select("QQ").unwrap();
        registry.load_selected(&store).await.unwrap();

        let doc = registry.document().unwrap();
        assert_eq!(doc.vip, Vip::On);
        assert_eq!(doc.title, "Hi");
        assert_eq!(doc.body, "");
        assert_eq!(doc.enter_package, "");
        assert!(doc.licenses.is_empty());

        registry
            .edit_selected(|doc| doc.title = "Hello".to_string())
            .unwrap();
        registry.save_selected(&store, "update QQ").await.unwrap();

        let expected = "{\n  \"VIP\": \"开\",\n  \"title\": \"Hello\",\n  \"body\": \"\",\n  \"enterPackage\": \"\",\n  \"leftUrl\": \"\",\n  \"rightUrl\": \"\",\n  \"licenses\": []\n}";
        assert_eq!(store.text_of(&config_loc).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_create_flow_for_missing_config() {
        let store = MemoryStore::new();
        store.seed(
            &list_loc(),
            r#"[{"name":"QQ","repo":"o/r","path":"configs/qq.json"}]"#,
        );
        let mut registry = Registry::new(list_loc());
        registry.ensure_list(&store).await.unwrap();
        registry.select("QQ").unwrap();

        registry.load_selected(&store).await.unwrap();
        assert!(matches!(registry.doc_state(), DocState::Missing));

        registry.create_selected(&store).await.unwrap();
        assert!(matches!(registry.doc_state(), DocState::Loaded { .. }));
        assert_eq!(
            registry.document().unwrap(),
            &ConfigDocument::default()
        );
    }
}
