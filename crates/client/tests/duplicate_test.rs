//! Container duplication: new UUID, fresh backend ids, both copies
//! resolvable side by side.

mod fixtures;

use client::client::Client;
use client::search::Search;
use common::object::{Container, WildlandObject};
use common::path::WildlandPath;
use fixtures::{local_storage_fields, setup_env, write_signed, OWNER};
use serde_yaml::Value;

fn search(client: &Client, path: &str) -> Search {
    Search::new(client, WildlandPath::from_str(path).unwrap()).unwrap()
}

#[test]
fn test_duplicate_container_end_to_end() {
    let (dir, mut client) = setup_env();
    let data_dir = dir.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();
    std::fs::write(data_dir.join("greeting.txt"), b"Hello").unwrap();

    let mut fields = local_storage_fields(&data_dir, false, None);
    fields.insert(
        "backend-id".into(),
        "11111111-2222-3333-4444-555555555555".into(),
    );
    let mut original = Container::new(OWNER, vec!["/path".into()], None, vec![]);
    original.add_backend(Value::Mapping(fields));
    write_signed(
        &dir.path().join("containers/original.container.yaml"),
        OWNER,
        &original.to_manifest().unwrap(),
    );
    client.load_local_manifests().unwrap();

    let original = client.containers()[0].clone();
    let copy = client.duplicate_container(&original).unwrap();

    // Fresh identity, same semantic paths.
    assert_ne!(copy.uuid().unwrap(), original.uuid().unwrap());
    assert_eq!(copy.paths()[1..], original.paths()[1..]);

    // The inline storage got a fresh backend-id and points back at the
    // copy, while still serving the same location.
    let original_storages = client.load_storages(&original);
    let copy_storages = client.load_storages(&copy);
    let original_storage = &original_storages[0];
    let copy_storage = &copy_storages[0];
    assert_ne!(copy_storage.backend_id(), original_storage.backend_id());
    assert_eq!(copy_storage.container_path(), copy.uuid_path().unwrap());
    assert_eq!(
        copy_storage.params().get("location"),
        original_storage.params().get("location")
    );

    // Persist the copy: both containers now answer at /path.
    client
        .save_object(&WildlandObject::Container(copy.clone()), "copy")
        .unwrap();
    let found = search(&client, ":/path:").read_container().unwrap();
    assert_eq!(found.len(), 2);
    let uuids: Vec<_> = found.iter().map(|c| c.uuid().unwrap()).collect();
    assert!(uuids.contains(&original.uuid().unwrap()));
    assert!(uuids.contains(&copy.uuid().unwrap()));

    // Content is reachable through the duplicated storage too.
    let read = search(&client, ":/path:/greeting.txt").read_file().unwrap();
    assert_eq!(read, b"Hello");
}

#[test]
fn test_duplicate_twice_yields_distinct_backend_ids() {
    let (dir, mut client) = setup_env();
    let data_dir = dir.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();

    let mut original = Container::new(OWNER, vec!["/path".into()], None, vec![]);
    original.add_backend(Value::Mapping(local_storage_fields(&data_dir, false, None)));
    write_signed(
        &dir.path().join("containers/original.container.yaml"),
        OWNER,
        &original.to_manifest().unwrap(),
    );
    client.load_local_manifests().unwrap();
    let original = client.containers()[0].clone();

    let first = client.duplicate_container(&original).unwrap();
    let second = client.duplicate_container(&original).unwrap();

    assert_ne!(first.uuid().unwrap(), second.uuid().unwrap());
    let first_id = client.load_storages(&first)[0].backend_id().to_string();
    let second_id = client.load_storages(&second)[0].backend_id().to_string();
    assert_ne!(first_id, second_id);
}
