use docsession::{memory::InMemoryStore, prelude::*};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Document)]
#[serde(rename_all = "PascalCase")]
struct Character {
    id: Option<String>,
    name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Document)]
#[document(collection = "Loot")]
struct Item {
    #[document(id)]
    key: Option<String>,
    attack: i32,
}

#[test]
fn derive_uses_the_type_name_or_the_attribute() {
    assert_eq!(Character::collection_name(), "Characters");
    assert_eq!(Item::collection_name(), "Loot");

    let mut item = Item { key: None, attack: 50 };
    assert_eq!(item.id(), None);

    item.set_id("Loot/1".to_string());
    assert_eq!(item.id(), Some("Loot/1"));
    assert_eq!(item.key.as_deref(), Some("Loot/1"));
}

#[tokio::test]
async fn connect_picks_the_backend_from_the_scheme() {
    let store = docsession::connect("memory://rpg").await.unwrap();
    assert!(store.backend_as::<InMemoryStore>().is_some());

    let mut session = store.open_session().unwrap();
    let mike = session
        .store(Character { id: None, name: "Mike Keenan".to_string() })
        .await
        .unwrap();
    session.save_changes().await.unwrap();

    let id = mike.read().id.clone().unwrap();
    let mut session = store.open_session().unwrap();
    let loaded = session.load::<Character>(&id).await.unwrap().unwrap();
    assert_eq!(loaded.read().name, "Mike Keenan");

    store.dispose().await.unwrap();
    assert!(matches!(store.open_session(), Err(DocumentStoreError::StoreDisposed)));
}

#[tokio::test]
async fn connect_rejects_unusable_urls() {
    for url in ["not a url", "ftp://example.com/"] {
        let err = docsession::connect(url).await.unwrap_err();
        assert!(matches!(err, DocumentStoreError::Configuration(_)), "{url}");
    }
}
