//! Integration tests for model create/save/find/delete cycles
//!
//! These tests run models against the in-memory source, which stands in for
//! a real store: every test builds its own registry and connections so no
//! state is shared between tests.

use fake::faker::company::en::CompanyName;
use fake::faker::internet::en::SafeEmail;
use fake::Fake;
use serde_json::json;
use std::collections::BTreeMap;
use tidemark::config::ModelSettings;
use tidemark::{
    merge, options, ConnectionConfig, Connections, CreateOptions, Field, ModelDef, ModelError, Options, Outcome,
    Registry, RemoveOptions, Rule, RuleKind, SaveOptions, Settings, SourceError,
};

fn setup_registry() -> Registry {
    let connections = Connections::new();
    connections.add("default", ConnectionConfig::new("memory"));
    let registry = Registry::new(connections);
    registry
        .define(
            ModelDef::new("Company")
                .field("id", Field::new("integer"))
                .field("name", Field::new("string"))
                .field("email", Field::new("string"))
                .field("employees", Field::new("integer").default_value(0))
                .validates("name", Rule::new(RuleKind::NotEmpty).message("Name is required"))
                .validates("email", Rule::new(RuleKind::Email).skip_empty()),
        )
        .expect("Failed to define Company");
    registry
}

fn fake_company() -> Options {
    let name: String = CompanyName().fake();
    let email: String = SafeEmail().fake();
    options(json!({"name": name, "email": email}))
}

#[test]
fn test_create_save_find_round_trip() {
    let registry = setup_registry();
    let companies = registry.model("Company").expect("Failed to get model");

    let data = fake_company();
    let mut company = companies
        .create(data.clone(), CreateOptions::default())
        .expect("Failed to create entity");
    assert!(!company.exists());
    assert_eq!(company.modified("name"), Some(true));

    let saved = companies
        .save(&mut company, Options::new(), SaveOptions::default())
        .expect("Failed to save");
    assert!(saved);
    assert!(company.exists());
    assert!(!company.is_modified());

    let id = company.get_json("id").cloned().expect("id assigned on insert");
    let found = companies
        .find(id.clone(), Options::new())
        .expect("Failed to find")
        .into_entity()
        .expect("record exists");

    assert!(found.exists());
    assert_eq!(found.get_json("id"), Some(&id));
    assert_eq!(found.get_json("name"), data.get("name"));
    assert_eq!(found.get_json("email"), data.get("email"));
    assert_eq!(found.get_json("employees"), Some(&json!(0)));
    assert_eq!(found.modified("name"), Some(false));
}

#[test]
fn test_insert_with_stored_key_is_rejected() {
    let registry = setup_registry();
    let companies = registry.model("Company").expect("Failed to get model");

    let mut original = companies
        .create(merge(fake_company(), options(json!({"id": 1}))), CreateOptions::default())
        .expect("Failed to create entity");
    assert_eq!(companies.save(&mut original, Options::new(), SaveOptions::default()), Ok(true));

    let mut copy = companies
        .create(merge(fake_company(), options(json!({"id": 1}))), CreateOptions::default())
        .expect("Failed to create entity");
    let result = companies.save(&mut copy, Options::new(), SaveOptions::default());
    assert!(matches!(result, Err(ModelError::Source(SourceError::DuplicateKey(_)))));
    assert!(!copy.exists());

    assert_eq!(companies.count(options(json!({"id": 1}))), Ok(1));
    let stored = companies.find(1, Options::new()).expect("find").into_entity().expect("entity");
    assert_eq!(stored.get_json("name"), original.get_json("name"));
}

#[test]
fn test_locked_save_keeps_undeclared_fields_pending() {
    let registry = setup_registry();
    let companies = registry.model("Company").expect("Failed to get model");
    let mut company = companies
        .create(merge(fake_company(), options(json!({"nickname": "Co"}))), CreateOptions::default())
        .expect("Failed to create entity");
    assert_eq!(companies.save(&mut company, Options::new(), SaveOptions::default()), Ok(true));

    let id = company.get_json("id").cloned().expect("id assigned on insert");
    let stored = companies.find(id, Options::new()).expect("find").into_entity().expect("entity");
    assert!(!stored.has("nickname"));

    // Every field the entity reports as saved is what the source holds.
    let saved: Vec<String> = company
        .modified_fields()
        .into_iter()
        .filter(|(_, modified)| !modified)
        .map(|(field, _)| field)
        .collect();
    assert!(!saved.is_empty());
    for field in &saved {
        assert_eq!(stored.get_json(field), company.get_json(field), "field `{}`", field);
    }
    assert_eq!(company.modified("nickname"), Some(true));
    assert!(company.is_modified());
}

#[test]
fn test_update_existing_record() {
    let registry = setup_registry();
    let companies = registry.model("Company").expect("Failed to get model");
    let mut company = companies
        .create(fake_company(), CreateOptions::default())
        .expect("Failed to create entity");
    companies
        .save(&mut company, Options::new(), SaveOptions::default())
        .expect("Failed to save");

    let renamed = companies
        .save(&mut company, options(json!({"name": "Renamed"})), SaveOptions::default())
        .expect("Failed to update");
    assert!(renamed);

    assert_eq!(companies.count(Options::new()), Ok(1));
    let stored = companies
        .first(Options::new())
        .expect("Failed to find")
        .expect("record exists");
    assert_eq!(stored.get_json("name"), Some(&json!("Renamed")));
}

#[test]
fn test_increments_apply_to_stored_value() {
    let registry = setup_registry();
    let companies = registry.model("Company").expect("Failed to get model");
    let mut company = companies
        .create(fake_company(), CreateOptions::default())
        .expect("Failed to create entity");
    company.set_field("employees", 5);
    companies
        .save(&mut company, Options::new(), SaveOptions::default())
        .expect("Failed to save");
    let id = company.get_json("id").cloned().expect("id");

    // Two copies loaded before either writes.
    let mut first = companies.find(id.clone(), Options::new()).expect("find").into_entity().expect("entity");
    let mut second = companies.find(id.clone(), Options::new()).expect("find").into_entity().expect("entity");

    first.increment("employees", 2).expect("numeric field");
    assert!(companies.save(&mut first, Options::new(), SaveOptions::default()).expect("save"));
    second.increment("employees", 3).expect("numeric field");
    assert!(companies.save(&mut second, Options::new(), SaveOptions::default()).expect("save"));

    assert_eq!(second.get_json("employees"), Some(&json!(10)));
    assert!(second.increments().is_empty());
    let stored = companies.find(id, Options::new()).expect("find").into_entity().expect("entity");
    assert_eq!(stored.get_json("employees"), Some(&json!(10)));
}

#[test]
fn test_validation_failure_leaves_source_untouched() {
    let registry = setup_registry();
    let companies = registry.model("Company").expect("Failed to get model");
    let mut company = companies
        .create(options(json!({"name": "", "email": "not-an-email"})), CreateOptions::default())
        .expect("Failed to create entity");

    let saved = companies
        .save(&mut company, Options::new(), SaveOptions::default())
        .expect("validation failures are not errors");

    assert!(!saved);
    assert!(!company.exists());
    assert_eq!(company.error("name"), Some(&["Name is required".to_string()][..]));
    assert!(company.error("email").is_some());
    assert_eq!(companies.count(Options::new()), Ok(0));
}

#[test]
fn test_skip_validation() {
    let registry = setup_registry();
    let companies = registry.model("Company").expect("Failed to get model");
    let mut company = companies
        .create(options(json!({"name": ""})), CreateOptions::default())
        .expect("Failed to create entity");
    let skip = SaveOptions {
        validate: tidemark::Validate::Skip,
        ..SaveOptions::default()
    };
    assert_eq!(companies.save(&mut company, Options::new(), skip), Ok(true));
    assert_eq!(companies.count(Options::new()), Ok(1));
}

#[test]
fn test_remove_requires_force_for_empty_conditions() {
    let registry = setup_registry();
    let companies = registry.model("Company").expect("Failed to get model");
    for _ in 0..2 {
        let mut company = companies
            .create(fake_company(), CreateOptions::default())
            .expect("Failed to create entity");
        companies
            .save(&mut company, Options::new(), SaveOptions::default())
            .expect("Failed to save");
    }
    assert_eq!(companies.count(Options::new()), Ok(2));

    let refused = companies.remove(Options::new(), RemoveOptions::default());
    assert_eq!(refused, Err(ModelError::UnguardedRemove("Company".into())));
    assert_eq!(companies.count(Options::new()), Ok(2));

    let removed = companies
        .remove(Options::new(), RemoveOptions { force: true })
        .expect("Failed to remove");
    assert!(removed);
    assert_eq!(companies.count(Options::new()), Ok(0));
}

#[test]
fn test_remove_and_update_by_conditions() {
    let registry = setup_registry();
    let companies = registry.model("Company").expect("Failed to get model");
    for (name, employees) in [("Acme", 10), ("Globex", 50), ("Initech", 200)] {
        let mut company = companies
            .create(options(json!({"name": name, "employees": employees})), CreateOptions::default())
            .expect("Failed to create entity");
        companies
            .save(&mut company, Options::new(), SaveOptions::default())
            .expect("Failed to save");
    }

    let updated = companies
        .update(
            options(json!({"employees": 0})),
            options(json!({"employees": {">": 40}})),
            Options::new(),
        )
        .expect("Failed to update");
    assert!(updated);
    assert_eq!(companies.count(options(json!({"employees": 0}))), Ok(2));

    companies
        .remove(options(json!({"name": "Acme"})), RemoveOptions::default())
        .expect("Failed to remove");
    assert_eq!(companies.count(Options::new()), Ok(2));
    assert_eq!(companies.exists(options(json!({"name": "Acme"}))), Ok(false));
}

#[test]
fn test_delete_entity() {
    let registry = setup_registry();
    let companies = registry.model("Company").expect("Failed to get model");
    let mut company = companies
        .create(fake_company(), CreateOptions::default())
        .expect("Failed to create entity");
    companies
        .save(&mut company, Options::new(), SaveOptions::default())
        .expect("Failed to save");
    let id = company.get_json("id").cloned().expect("id");

    assert_eq!(companies.delete(&mut company, Options::new()), Ok(true));
    assert!(!company.exists());
    assert_eq!(companies.find(id, Options::new()), Ok(Outcome::None));
}

#[test]
fn test_registry_from_settings() {
    let settings = Settings {
        connections: BTreeMap::from([(
            "default".to_string(),
            ConnectionConfig::new("memory").option("ids", "uuid"),
        )]),
        models: ModelSettings { locked: false },
    };
    let registry = Registry::from_settings(&settings);
    registry
        .define(
            ModelDef::new("Note")
                .field("id", Field::new("string"))
                .field("body", Field::new("string")),
        )
        .expect("Failed to define Note");
    let notes = registry.model("Note").expect("Failed to get model");
    assert!(!notes.meta().locked);

    let mut note = notes
        .create(options(json!({"body": "hello", "extra": 1})), CreateOptions::default())
        .expect("Failed to create entity");
    assert!(notes.save(&mut note, Options::new(), SaveOptions::default()).expect("save"));

    let id = note.get_json("id").and_then(|v| v.as_str()).map(str::to_string).expect("uuid id");
    assert_eq!(id.len(), 36);
    let stored = notes.first(Options::new()).expect("find").expect("record");
    assert_eq!(stored.get_json("extra"), Some(&json!(1)));
}
