//! Scenario tests for structured-column expansion: object replacement,
//! scalar-array child rows, object-array junctions, and failure modes.

mod common;

use common::fresh_db;
use normalize_core::{ForeignKey, Row, SqlValue};
use normalize_sqlite::{json_decode, NormalizeError};
use std::collections::HashSet;

#[tokio::test]
async fn expand_object_replaces_column_with_foreign_key() {
    let db = fresh_db().await;
    let trees = db.table("trees");
    trees
        .insert(
            Row::new().col("id", 1_i64).col(
                "species",
                "{\"id\": 5, \"name\": \"Tree 1\", \"common_name\": \"Palm\"}",
            ),
            Some("id"),
        )
        .await
        .unwrap();
    assert_eq!(db.table_names().await.unwrap(), vec!["trees"]);

    trees
        .extract_expand("species", json_decode, "species", "id")
        .await
        .unwrap();

    let names: HashSet<String> = db.table_names().await.unwrap().into_iter().collect();
    assert_eq!(names, HashSet::from(["trees".to_string(), "species".to_string()]));
    assert_eq!(
        trees.rows().await.unwrap(),
        vec![Row::new().col("id", 1_i64).col("species_id", 5_i64)]
    );
    assert_eq!(
        db.table("species").rows().await.unwrap(),
        vec![Row::new()
            .col("id", 5_i64)
            .col("name", "Tree 1")
            .col("common_name", "Palm")]
    );
    assert_eq!(
        trees.foreign_keys().await.unwrap(),
        vec![ForeignKey::new("trees", "species_id", "species", "id")]
    );
}

#[tokio::test]
async fn expand_scalar_array_into_child_rows() {
    let db = fresh_db().await;
    let trees = db.table("trees");
    trees
        .insert(
            Row::new()
                .col("id", 1_i64)
                .col("names", "[\"Palm\", \"Arecaceae\"]"),
            Some("id"),
        )
        .await
        .unwrap();

    trees
        .extract_expand("names", json_decode, "names", "id")
        .await
        .unwrap();

    let table_names: HashSet<String> = db.table_names().await.unwrap().into_iter().collect();
    assert_eq!(
        table_names,
        HashSet::from(["trees".to_string(), "names".to_string()])
    );
    assert_eq!(
        trees.rows().await.unwrap(),
        vec![Row::new().col("id", 1_i64)]
    );
    assert_eq!(
        db.table("names").rows().await.unwrap(),
        vec![
            Row::new()
                .col("id", 1_i64)
                .col("trees_id", 1_i64)
                .col("value", "Palm"),
            Row::new()
                .col("id", 2_i64)
                .col("trees_id", 1_i64)
                .col("value", "Arecaceae"),
        ]
    );
    assert_eq!(
        db.table("names").foreign_keys().await.unwrap(),
        vec![ForeignKey::new("names", "trees_id", "trees", "id")]
    );
}

#[tokio::test]
async fn expand_object_array_through_junction() {
    let db = fresh_db().await;
    let trees = db.table("trees");
    trees
        .insert(
            Row::new().col("id", 1_i64).col(
                "tags",
                "[{\"id\": 1, \"name\": \"warm-climate\"}, \
                 {\"id\": 2, \"name\": \"green-leaves\"}]",
            ),
            Some("id"),
        )
        .await
        .unwrap();

    trees
        .extract_expand("tags", json_decode, "tags", "id")
        .await
        .unwrap();

    let table_names: HashSet<String> = db.table_names().await.unwrap().into_iter().collect();
    assert_eq!(
        table_names,
        HashSet::from([
            "trees".to_string(),
            "tags".to_string(),
            "tags_trees".to_string(),
        ])
    );
    assert_eq!(
        trees.rows().await.unwrap(),
        vec![Row::new().col("id", 1_i64)]
    );
    assert_eq!(
        db.table("tags").rows().await.unwrap(),
        vec![
            Row::new().col("id", 1_i64).col("name", "warm-climate"),
            Row::new().col("id", 2_i64).col("name", "green-leaves"),
        ]
    );
    assert_eq!(
        db.table("tags_trees").rows().await.unwrap(),
        vec![
            Row::new().col("trees_id", 1_i64).col("tags_id", 1_i64),
            Row::new().col("trees_id", 1_i64).col("tags_id", 2_i64),
        ]
    );
    assert_eq!(
        db.table("tags_trees").foreign_keys().await.unwrap(),
        vec![
            ForeignKey::new("tags_trees", "trees_id", "trees", "id"),
            ForeignKey::new("tags_trees", "tags_id", "tags", "id"),
        ]
    );
}

#[tokio::test]
async fn expand_object_null_cells_produce_null_foreign_keys() {
    let db = fresh_db().await;
    let trees = db.table("trees");
    trees
        .insert_all(
            vec![
                Row::new()
                    .col("id", 1_i64)
                    .col("species", "{\"id\": 5, \"name\": \"Palm\"}"),
                Row::new().col("id", 2_i64).col("species", None::<&str>),
            ],
            Some("id"),
        )
        .await
        .unwrap();

    trees
        .extract_expand("species", json_decode, "species", "id")
        .await
        .unwrap();

    assert_eq!(
        trees.rows().await.unwrap(),
        vec![
            Row::new().col("id", 1_i64).col("species_id", 5_i64),
            Row::new().col("id", 2_i64).col("species_id", None::<i64>),
        ]
    );
}

#[tokio::test]
async fn expand_empty_arrays_produce_no_child_rows() {
    let db = fresh_db().await;
    let trees = db.table("trees");
    trees
        .insert_all(
            vec![
                Row::new().col("id", 1_i64).col("names", "[]"),
                Row::new().col("id", 2_i64).col("names", "[\"Palm\"]"),
            ],
            Some("id"),
        )
        .await
        .unwrap();

    trees
        .extract_expand("names", json_decode, "names", "id")
        .await
        .unwrap();

    assert_eq!(
        db.table("names").rows().await.unwrap(),
        vec![Row::new()
            .col("id", 1_i64)
            .col("trees_id", 2_i64)
            .col("value", "Palm")]
    );
}

#[tokio::test]
async fn expand_shape_mismatch_rolls_everything_back() {
    let db = fresh_db().await;
    let trees = db.table("trees");
    trees
        .insert_all(
            vec![
                Row::new().col("id", 1_i64).col("species", "{\"name\": \"Palm\"}"),
                Row::new().col("id", 2_i64).col("species", "[1, 2]"),
            ],
            Some("id"),
        )
        .await
        .unwrap();
    let before = trees.schema().await.unwrap();

    let result = trees
        .extract_expand("species", json_decode, "species", "id")
        .await;
    assert!(matches!(result, Err(NormalizeError::ShapeMismatch { .. })));

    // nothing was created or rewritten
    assert_eq!(db.table_names().await.unwrap(), vec!["trees"]);
    assert_eq!(trees.schema().await.unwrap(), before);
}

#[tokio::test]
async fn expand_objects_without_explicit_id_are_deduplicated() {
    let db = fresh_db().await;
    let trees = db.table("trees");
    trees
        .insert_all(
            vec![
                Row::new()
                    .col("id", 1_i64)
                    .col("species", "{\"name\": \"Palm\"}"),
                Row::new()
                    .col("id", 2_i64)
                    .col("species", "{\"name\": \"Palm\"}"),
                Row::new()
                    .col("id", 3_i64)
                    .col("species", "{\"name\": \"Oak\"}"),
            ],
            Some("id"),
        )
        .await
        .unwrap();

    trees
        .extract_expand("species", json_decode, "species", "id")
        .await
        .unwrap();

    assert_eq!(
        db.table("species").rows().await.unwrap(),
        vec![
            Row::new().col("id", 1_i64).col("name", "Palm"),
            Row::new().col("id", 2_i64).col("name", "Oak"),
        ]
    );
    assert_eq!(
        trees.rows().await.unwrap(),
        vec![
            Row::new().col("id", 1_i64).col("species_id", 1_i64),
            Row::new().col("id", 2_i64).col("species_id", 1_i64),
            Row::new().col("id", 3_i64).col("species_id", 2_i64),
        ]
    );
}

#[tokio::test]
async fn expand_repeated_explicit_ids_upsert() {
    let db = fresh_db().await;
    let trees = db.table("trees");
    trees
        .insert_all(
            vec![
                Row::new()
                    .col("id", 1_i64)
                    .col("species", "{\"id\": 5, \"name\": \"A\"}"),
                Row::new()
                    .col("id", 2_i64)
                    .col("species", "{\"id\": 5, \"name\": \"B\"}"),
            ],
            Some("id"),
        )
        .await
        .unwrap();

    trees
        .extract_expand("species", json_decode, "species", "id")
        .await
        .unwrap();

    // the later payload wins; both rows reference the same id
    assert_eq!(
        db.table("species").rows().await.unwrap(),
        vec![Row::new().col("id", 5_i64).col("name", "B")]
    );
    assert_eq!(
        trees.rows().await.unwrap(),
        vec![
            Row::new().col("id", 1_i64).col("species_id", 5_i64),
            Row::new().col("id", 2_i64).col("species_id", 5_i64),
        ]
    );
}

#[tokio::test]
async fn expand_later_objects_can_add_columns() {
    let db = fresh_db().await;
    let trees = db.table("trees");
    trees
        .insert_all(
            vec![
                Row::new()
                    .col("id", 1_i64)
                    .col("species", "{\"id\": 1, \"name\": \"Palm\"}"),
                Row::new().col("id", 2_i64).col(
                    "species",
                    "{\"id\": 2, \"name\": \"Oak\", \"family\": \"Fagaceae\"}",
                ),
            ],
            Some("id"),
        )
        .await
        .unwrap();

    trees
        .extract_expand("species", json_decode, "species", "id")
        .await
        .unwrap();

    assert_eq!(
        db.table("species").rows().await.unwrap(),
        vec![
            Row::new()
                .col("id", 1_i64)
                .col("name", "Palm")
                .col("family", None::<&str>),
            Row::new()
                .col("id", 2_i64)
                .col("name", "Oak")
                .col("family", "Fagaceae"),
        ]
    );
}

#[tokio::test]
async fn expand_scalar_array_of_integers_infers_value_type() {
    let db = fresh_db().await;
    let trees = db.table("trees");
    trees
        .insert(
            Row::new().col("id", 1_i64).col("rings", "[3, 7]"),
            Some("id"),
        )
        .await
        .unwrap();

    trees
        .extract_expand("rings", json_decode, "rings", "id")
        .await
        .unwrap();

    assert!(db
        .table("rings")
        .schema()
        .await
        .unwrap()
        .contains("[value] INTEGER"));
    assert_eq!(
        db.table("rings").rows().await.unwrap(),
        vec![
            Row::new()
                .col("id", 1_i64)
                .col("trees_id", 1_i64)
                .col("value", 3_i64),
            Row::new()
                .col("id", 2_i64)
                .col("trees_id", 1_i64)
                .col("value", 7_i64),
        ]
    );
}

#[tokio::test]
async fn expand_column_of_nulls_is_a_noop() {
    let db = fresh_db().await;
    let trees = db.table("trees");
    trees
        .insert(
            Row::new().col("id", 1_i64).col("species", None::<&str>),
            Some("id"),
        )
        .await
        .unwrap();
    let before = trees.schema().await.unwrap();

    trees
        .extract_expand("species", json_decode, "species", "id")
        .await
        .unwrap();

    assert_eq!(trees.schema().await.unwrap(), before);
    assert_eq!(db.table_names().await.unwrap(), vec!["trees"]);
}

#[tokio::test]
async fn expand_validation_failures() {
    let db = fresh_db().await;

    let missing_table = db
        .table("trees")
        .extract_expand("species", json_decode, "species", "id")
        .await;
    assert!(matches!(
        missing_table,
        Err(NormalizeError::TableNotFound(_))
    ));

    db.table("trees")
        .insert(Row::new().col("id", 1_i64).col("name", "Tree 1"), Some("id"))
        .await
        .unwrap();
    let missing_column = db
        .table("trees")
        .extract_expand("species", json_decode, "species", "id")
        .await;
    assert!(matches!(
        missing_column,
        Err(NormalizeError::InvalidColumns(_))
    ));

    // a non-text payload cell cannot be decoded
    db.execute(
        "INSERT INTO [trees] ([id], [name]) VALUES (?, ?)",
        vec![SqlValue::Int(2), SqlValue::Text("Tree 2".into())],
    )
    .await
    .unwrap();
    db.table("trees").add_column("species", normalize_core::SqlType::Blob).await.unwrap();
    db.execute(
        "UPDATE [trees] SET [species] = ? WHERE [id] = ?",
        vec![SqlValue::Int(7), SqlValue::Int(2)],
    )
    .await
    .unwrap();
    let not_text = db
        .table("trees")
        .extract_expand("species", json_decode, "species", "id")
        .await;
    assert!(matches!(
        not_text,
        Err(NormalizeError::ShapeMismatch { .. })
    ));
}
