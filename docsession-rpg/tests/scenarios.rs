use std::{io::Cursor, time::Duration};

use docsession::{
    memory::{InMemoryStore, IndexingMode},
    prelude::*,
};
use docsession_rpg::{CharacterCountByClass, CharactersByName, Character, Item, ReduceResult};

const WAIT: Duration = Duration::from_secs(5);

async fn open_store() -> DocumentStore<InMemoryStore> {
    let backend = InMemoryStore::builder()
        .with_indexing_mode(IndexingMode::Manual)
        .build()
        .await
        .unwrap();

    DocumentStore::new(backend)
}

fn mike_keenan() -> Character {
    Character::new("Mike Keenan", "Developer", "Robot").with_item(Item::new("Flamethrower", 50, 0))
}

/// Stores `characters` in one session and returns their identities.
async fn seed(store: &DocumentStore<InMemoryStore>, characters: Vec<Character>) -> Vec<String> {
    let mut session = store.open_session().unwrap();
    let mut ids = Vec::new();

    for character in characters {
        let tracked = session.store(character).await.unwrap();
        ids.push(tracked.read().id.clone().unwrap());
    }
    session.save_changes().await.unwrap();

    ids
}

#[tokio::test]
async fn saving_and_loading_mike_keenan() {
    let store = open_store().await;
    let ids = seed(&store, vec![mike_keenan()]).await;
    assert_eq!(ids, vec!["Characters/1"]);

    let mut session = store.open_session().unwrap();
    let character = session.load::<Character>(&ids[0]).await.unwrap().unwrap();

    let character = character.snapshot();
    assert_eq!(character.name, "Mike Keenan");
    assert_eq!(character.class.name, "Developer");
    assert_eq!(character.inventory[0].attack, 50);
    assert_eq!(Character { id: None, ..character }, mike_keenan());
}

#[tokio::test]
async fn chosen_identities_are_kept_verbatim() {
    let store = open_store().await;

    let mut mike = mike_keenan();
    mike.id = Some("Characters/mike.".to_string());
    let ids = seed(&store, vec![mike]).await;
    assert_eq!(ids, vec!["Characters/mike."]);

    let mut session = store.open_session().unwrap();
    let loaded = session.load::<Character>("Characters/mike.").await.unwrap();
    assert_eq!(loaded.map(|tracked| tracked.read().name.clone()).as_deref(), Some("Mike Keenan"));
    assert!(session.load::<Character>("Characters/mike.1").await.unwrap().is_none());
    assert_eq!(store.backend().document_count().await, 1);
}

#[tokio::test]
async fn loads_within_a_session_share_one_instance() {
    let store = open_store().await;
    let ids = seed(&store, vec![mike_keenan()]).await;

    let mut session = store.open_session().unwrap();
    let first = session.load::<Character>(&ids[0]).await.unwrap().unwrap();
    let second = session.load::<Character>(&ids[0]).await.unwrap().unwrap();

    assert!(first.ptr_eq(&second));
    first.write().name = "Jim".to_string();
    assert_eq!(second.read().name, "Jim");
    assert_eq!(session.number_of_requests(), 1);
}

#[tokio::test]
async fn updating_through_a_loaded_entity() {
    let store = open_store().await;
    let ids = seed(&store, vec![mike_keenan()]).await;

    let mut session = store.open_session().unwrap();
    let character = session.load::<Character>(&ids[0]).await.unwrap().unwrap();
    {
        let mut character = character.write();
        character.name = "Jim".to_string();
        character.class.name = "Badass".to_string();
    }
    assert!(session.has_changes());
    session.save_changes().await.unwrap();

    let mut session = store.open_session().unwrap();
    let character = session.load::<Character>(&ids[0]).await.unwrap().unwrap();
    assert_eq!(character.read().name, "Jim");
    assert_eq!(character.read().class.name, "Badass");
}

#[tokio::test]
async fn deleting_a_loaded_entity() {
    let store = open_store().await;
    let ids = seed(&store, vec![mike_keenan()]).await;

    let mut session = store.open_session().unwrap();
    let character = session.load::<Character>(&ids[0]).await.unwrap().unwrap();
    session.delete_entity(&character).unwrap();
    assert!(session.load::<Character>(&ids[0]).await.unwrap().is_none());
    session.save_changes().await.unwrap();

    let mut session = store.open_session().unwrap();
    assert!(session.load::<Character>(&ids[0]).await.unwrap().is_none());
}

#[tokio::test]
async fn query_for_characters_with_a_strong_item() {
    let store = open_store().await;
    seed(
        &store,
        vec![
            mike_keenan(),
            Character::new("Ann", "Tester", "Human")
                .with_item(Item::new("Old Boot", 1, 1))
                .with_item(Item::new("Stick", 5, 0)),
            Character::new("Bob", "Samurai", "Alien").with_item(Item::new("Throwing Knives", 8, 0)),
            Character::new("Cid", "Ninja", "Alien"),
        ],
    )
    .await;

    let mut session = store.open_session().unwrap();
    let results = session
        .query::<Character>()
        .filter(Filter::any("Inventory", Filter::gt("Attack", 5)))
        .sort("Name", SortDirection::Asc)
        .wait_for_non_stale_results(WAIT)
        .execute()
        .await
        .unwrap();

    let names = results
        .into_iter()
        .map(|character| character.read().name.clone())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["Bob", "Mike Keenan"]);
}

#[tokio::test]
async fn query_with_a_static_index() {
    let store = open_store().await;
    store.execute_index::<CharactersByName>().await.unwrap();
    seed(
        &store,
        vec![
            mike_keenan(),
            Character::new("Mike Tyson", "Boxer", "Human"),
            Character::new("Ann", "Tester", "Human"),
        ],
    )
    .await;

    let mut session = store.open_session().unwrap();
    let results = session
        .query::<Character>()
        .using::<CharactersByName>()
        .filter(Filter::starts_with("Name", "Mike"))
        .wait_for_non_stale_results(WAIT)
        .execute()
        .await
        .unwrap();

    assert_eq!(results.statistics.index_name, CharactersByName::NAME);
    assert_eq!(results.len(), 2);
    assert!(results.into_iter().all(|character| character.read().name.starts_with("Mike")));
}

#[tokio::test]
async fn map_reduce_counts_characters_per_class() {
    let store = open_store().await;
    store.execute_index::<CharacterCountByClass>().await.unwrap();
    seed(
        &store,
        vec![
            mike_keenan(),
            Character::new("Jim", "Developer", "Human"),
            Character::new("Ann", "Tester", "Human"),
        ],
    )
    .await;

    let mut session = store.open_session().unwrap();
    let developers = session
        .query_index::<CharacterCountByClass>()
        .filter(Filter::eq("ClassName", "Developer"))
        .wait_for_non_stale_results(WAIT)
        .first()
        .await
        .unwrap();
    assert_eq!(
        developers,
        Some(ReduceResult { class_name: "Developer".to_string(), count: 2 })
    );

    let missing = session
        .query_index::<CharacterCountByClass>()
        .filter(Filter::eq("ClassName", "Some Class"))
        .first()
        .await
        .unwrap()
        .unwrap_or_default();
    assert_eq!(missing.count, 0);
}

#[tokio::test]
async fn registering_an_unchanged_index_twice_is_a_no_op() {
    let store = open_store().await;

    let first = store.execute_index::<CharacterCountByClass>().await.unwrap();
    seed(&store, vec![mike_keenan()]).await;
    store.backend().run_indexing().await;

    let second = store.execute_index::<CharacterCountByClass>().await.unwrap();

    assert_eq!(first.outcome, IndexOutcome::Created);
    assert_eq!(second.outcome, IndexOutcome::Unchanged);
    assert!(
        !store
            .backend()
            .is_index_stale(CharacterCountByClass::NAME)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn staleness_is_reported_until_indexing_catches_up() {
    let store = open_store().await;
    store.execute_index::<CharactersByName>().await.unwrap();
    seed(&store, vec![mike_keenan()]).await;

    let mut session = store.open_session().unwrap();
    let stale = session
        .query::<Character>()
        .using::<CharactersByName>()
        .execute()
        .await
        .unwrap();
    assert!(stale.is_stale());

    let fresh = session
        .query::<Character>()
        .using::<CharactersByName>()
        .wait_for_non_stale_results(WAIT)
        .execute()
        .await
        .unwrap();
    assert!(!fresh.is_stale());
    assert_eq!(fresh.len(), 1);
}

#[tokio::test]
async fn pages_concatenate_to_the_whole_result() {
    let store = open_store().await;
    let characters = ["Ann", "Bob", "Cid", "Dee", "Eve", "Fay", "Gus"]
        .into_iter()
        .map(|name| Character::new(name, "Peasant", "Human"))
        .collect();
    seed(&store, characters).await;

    let mut session = store.open_session().unwrap();
    let names = |results: Vec<Tracked<Character>>| {
        results
            .into_iter()
            .map(|character| character.read().name.clone())
            .collect::<Vec<_>>()
    };

    let all = session
        .query::<Character>()
        .sort("Name", SortDirection::Asc)
        .execute()
        .await
        .unwrap();
    let all = names(all.into_items());

    let mut concatenated = Vec::new();
    let mut params = PaginationParams::new(1, 2);
    loop {
        let page = session
            .query::<Character>()
            .sort("Name", SortDirection::Asc)
            .page(&params)
            .await
            .unwrap();

        assert!(page.items.len() <= 2);
        assert_eq!(page.count, 7);
        concatenated.extend(names(page.items));

        match page.next_page {
            Some(next) => params = PaginationParams::new(next, 2),
            None => break,
        }
    }

    assert_eq!(concatenated, all);
    assert_eq!(params.page, 4);
}

#[tokio::test]
async fn a_stale_session_cannot_overwrite_a_newer_version() {
    let store = open_store().await;
    let ids = seed(&store, vec![mike_keenan()]).await;

    let mut a = store.open_session().unwrap();
    let mut b = store.open_session().unwrap();
    let in_a = a.load::<Character>(&ids[0]).await.unwrap().unwrap();
    let in_b = b.load::<Character>(&ids[0]).await.unwrap().unwrap();

    in_b.write().name = "Changed in B".to_string();
    b.save_changes().await.unwrap();

    in_a.write().name = "Changed in A".to_string();
    let err = a.save_changes().await.unwrap_err();

    match err {
        DocumentStoreError::ConcurrencyConflict { id, expected, actual } => {
            assert_eq!(id, ids[0]);
            assert_ne!(expected, actual);
        }
        other => panic!("expected a conflict, got {other:?}"),
    }
    assert_eq!(a.state(), SessionState::Open);
    assert!(a.has_changes());
}

#[tokio::test]
async fn patching_adds_the_old_boot() {
    let store = open_store().await;
    let ids = seed(&store, vec![mike_keenan()]).await;
    let old_boot = Item::new("Old Boot", 1, 1);

    store
        .patch(&ids[0], vec![PatchOperation::add("Inventory", old_boot.to_bson().unwrap())])
        .await
        .unwrap();

    let mut session = store.open_session().unwrap();
    let character = session.load::<Character>(&ids[0]).await.unwrap().unwrap();
    let inventory = character.read().inventory.clone();

    assert_eq!(inventory.len(), 2);
    assert_eq!(inventory.last(), Some(&old_boot));
}

#[tokio::test]
async fn patching_a_missing_character_fails() {
    let store = open_store().await;

    let err = store
        .patch("Characters/404", vec![PatchOperation::set("Name", "Nobody")])
        .await
        .unwrap_err();

    assert!(matches!(err, DocumentStoreError::DocumentNotFound(id) if id == "Characters/404"));
}

#[tokio::test]
async fn loading_with_an_include_answers_the_sibling_locally() {
    let store = open_store().await;

    let mut session = store.open_session().unwrap();
    let user = session
        .store(
            Character::new("User 2", "Samurai", "Alien")
                .with_item(Item::new("Throwing Knives", 8, 0)),
        )
        .await
        .unwrap();
    let user_id = user.read().id.clone().unwrap();
    let sibling = session
        .store(
            Character::new("User 2 Sibling", "Ninja", "Alien")
                .with_item(Item::new("RPG", 1000, 0))
                .with_sibling(user_id.clone()),
        )
        .await
        .unwrap();
    let sibling_id = sibling.read().id.clone().unwrap();
    session.save_changes().await.unwrap();

    let mut session = store.open_session().unwrap();
    let loaded = session
        .include("SiblingId")
        .load::<Character>(&sibling_id)
        .await
        .unwrap()
        .unwrap();
    let referenced = loaded.read().sibling_id.clone().unwrap();
    assert_eq!(referenced, user_id);

    let user = session.load::<Character>(&referenced).await.unwrap().unwrap();
    assert_eq!(user.read().name, "User 2");
    assert_eq!(session.number_of_requests(), 1);
}

#[tokio::test]
async fn paged_queries_report_totals_and_includes() {
    let store = open_store().await;
    let ids = seed(
        &store,
        vec![
            Character::new("Ann", "Tester", "Human"),
            Character::new("Bob", "Tester", "Human"),
            Character::new("Cid", "Tester", "Human"),
        ],
    )
    .await;

    let mut session = store.open_session().unwrap();
    let bob = session.load::<Character>(&ids[1]).await.unwrap().unwrap();
    bob.write().sibling_id = Some(ids[2].clone());
    session.save_changes().await.unwrap();

    let mut session = store.open_session().unwrap();
    let results = session
        .query::<Character>()
        .sort("Name", SortDirection::Asc)
        .include("SiblingId")
        .skip(1)
        .take(1)
        .execute()
        .await
        .unwrap();

    assert_eq!(results.statistics.total_results, 3);
    assert_eq!(results.len(), 1);

    let cid = session.load::<Character>(&ids[2]).await.unwrap().unwrap();
    assert_eq!(cid.read().name, "Cid");
    assert_eq!(session.number_of_requests(), 1);
}

#[tokio::test]
async fn attachments_travel_next_to_characters() {
    let store = open_store().await;

    let mut metadata = AttachmentMetadata::new();
    metadata.insert("Description".to_string(), "An Image".to_string());
    store
        .put_attachment_from_reader("images/1", Cursor::new(vec![0xFF, 0xD8, 0xFF, 0xE0]), metadata)
        .await
        .unwrap();
    let ids = seed(&store, vec![mike_keenan().with_image("images/1")]).await;

    let image_id = {
        let mut session = store.open_session().unwrap();
        let character = session.load::<Character>(&ids[0]).await.unwrap().unwrap();
        let image_id = character.read().image_id.clone();
        image_id.unwrap()
    };

    let attachment = store.get_attachment(&image_id).await.unwrap().unwrap();
    assert_eq!(attachment.size, 4);
    assert_eq!(attachment.metadata_value("Description"), Some("An Image"));
}

#[tokio::test]
async fn a_disposed_store_opens_no_sessions() {
    let store = open_store().await;
    store.dispose().await.unwrap();
    store.dispose().await.unwrap();

    assert!(matches!(store.open_session(), Err(DocumentStoreError::StoreDisposed)));
    assert!(matches!(
        store.get_attachment("images/1").await,
        Err(DocumentStoreError::StoreDisposed)
    ));
}
