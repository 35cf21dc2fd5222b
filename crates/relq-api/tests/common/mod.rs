//! Shared fixtures: a small mentoring schema with seeded rows.
#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use relq::{
    ColumnDef, EngineConfig, FindManyArgs, MemoryExecutor, QueryEngine, Record,
    RelationDefinition, Row, SchemaRegistry, TableDef, ThroughTable, Value,
};
use std::collections::BTreeSet;
use std::sync::Arc;

pub fn catalog() -> Vec<TableDef> {
    vec![
        TableDef::new("Class")
            .column(ColumnDef::text("id").primary_key())
            .column(ColumnDef::text("name"))
            .column(ColumnDef::text("room").nullable()),
        TableDef::new("ClassSession")
            .column(ColumnDef::text("id").primary_key())
            .column(ColumnDef::text("classId").references("Class", "id"))
            .column(ColumnDef::text("title")),
        TableDef::new("Enrollment")
            .column(ColumnDef::text("id").primary_key())
            .column(ColumnDef::text("classId").references("Class", "id"))
            .column(ColumnDef::text("student")),
        TableDef::new("Tag")
            .column(ColumnDef::text("id").primary_key())
            .column(ColumnDef::text("label")),
        TableDef::new("ClassTag")
            .column(ColumnDef::text("classId").references("Class", "id"))
            .column(ColumnDef::text("tagId").references("Tag", "id"))
            .primary_key(["classId", "tagId"]),
        TableDef::new("Mentor")
            .column(ColumnDef::text("id").primary_key())
            .column(ColumnDef::text("name")),
        TableDef::new("Contract")
            .column(ColumnDef::text("id").primary_key())
            .column(ColumnDef::text("status"))
            .column(ColumnDef::timestamp("createdAt"))
            .column(ColumnDef::text("mentorId").nullable().references("Mentor", "id"))
            .column(ColumnDef::integer("score").nullable()),
    ]
}

/// Inferred relations plus `Class.sessions` and the many-to-many `Class.tags`
pub fn registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::from_catalog(&catalog());
    registry
        .define_relations(
            "Class",
            [
                RelationDefinition::one_to_many("sessions", "ClassSession", "id", "classId"),
                RelationDefinition::many_to_many(
                    "tags",
                    "Tag",
                    "id",
                    "id",
                    ThroughTable {
                        table: "ClassTag".to_string(),
                        from_column: "classId".to_string(),
                        to_column: "tagId".to_string(),
                    },
                ),
            ],
        )
        .unwrap();
    registry
}

pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

fn day(d: u32) -> Value {
    Value::from(Utc.with_ymd_and_hms(2024, 1, d, 9, 0, 0).unwrap())
}

/// Rows:
/// - c1 Algebra: sessions Intro, Lab; one enrollment; tag math
/// - c2 Biology (no room): sessions Cells, Genes, Plants; two enrollments;
///   tags math, science
/// - c3 Chemistry: nothing attached except tag science
/// - contracts k1..k5 created on consecutive days
pub fn seeded() -> MemoryExecutor {
    let executor = MemoryExecutor::new();
    executor
        .insert_rows(
            "Class",
            [
                row(&[("id", "c1".into()), ("name", "Algebra".into()), ("room", "A1".into())]),
                row(&[("id", "c2".into()), ("name", "Biology".into()), ("room", Value::Null)]),
                row(&[("id", "c3".into()), ("name", "Chemistry".into()), ("room", "C3".into())]),
            ],
        )
        .unwrap();
    executor
        .insert_rows(
            "ClassSession",
            [
                ("s1", "c1", "Intro"),
                ("s2", "c1", "Lab"),
                ("s3", "c2", "Cells"),
                ("s4", "c2", "Genes"),
                ("s5", "c2", "Plants"),
            ]
            .into_iter()
            .map(|(id, class, title)| {
                row(&[("id", id.into()), ("classId", class.into()), ("title", title.into())])
            }),
        )
        .unwrap();
    executor
        .insert_rows(
            "Enrollment",
            [("e1", "c2", "Ana"), ("e2", "c2", "Ben"), ("e3", "c1", "Cy")]
                .into_iter()
                .map(|(id, class, student)| {
                    row(&[
                        ("id", id.into()),
                        ("classId", class.into()),
                        ("student", student.into()),
                    ])
                }),
        )
        .unwrap();
    executor
        .insert_rows(
            "Tag",
            [
                row(&[("id", "t1".into()), ("label", "math".into())]),
                row(&[("id", "t2".into()), ("label", "science".into())]),
            ],
        )
        .unwrap();
    executor
        .insert_rows(
            "ClassTag",
            [("c1", "t1"), ("c2", "t1"), ("c2", "t2"), ("c3", "t2")]
                .into_iter()
                .map(|(class, tag)| row(&[("classId", class.into()), ("tagId", tag.into())])),
        )
        .unwrap();
    executor
        .insert_rows(
            "Mentor",
            [
                row(&[("id", "m1".into()), ("name", "Ada".into())]),
                row(&[("id", "m2".into()), ("name", "Grace".into())]),
            ],
        )
        .unwrap();
    executor
        .insert_rows(
            "Contract",
            [
                ("k1", "active", 1, Value::from("m1"), Value::Integer(10)),
                ("k2", "ended", 2, Value::from("m1"), Value::Null),
                ("k3", "paused", 3, Value::from("m2"), Value::Integer(30)),
                ("k4", "ended", 4, Value::Null, Value::Integer(40)),
                ("k5", "active", 5, Value::from("m2"), Value::Integer(20)),
            ]
            .into_iter()
            .map(|(id, status, d, mentor, score)| {
                row(&[
                    ("id", id.into()),
                    ("status", status.into()),
                    ("createdAt", day(d)),
                    ("mentorId", mentor),
                    ("score", score),
                ])
            }),
        )
        .unwrap();
    executor
}

pub fn engine() -> QueryEngine<MemoryExecutor> {
    engine_with(EngineConfig::default())
}

pub fn engine_with(config: EngineConfig) -> QueryEngine<MemoryExecutor> {
    QueryEngine::with_config(Arc::new(registry()), seeded(), config)
}

pub fn args(value: serde_json::Value) -> FindManyArgs {
    serde_json::from_value(value).unwrap()
}

/// `id` of every record, in order
pub fn ids(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|record| record["id"].as_str().unwrap_or_default().to_string())
        .collect()
}

pub fn keys(record: &Record) -> BTreeSet<&str> {
    record.keys().map(String::as_str).collect()
}

/// Ids inside a relation array, sorted
pub fn related_ids(record: &Record, relation: &str) -> Vec<String> {
    let mut ids = ids(record[relation].as_list().unwrap_or_default());
    ids.sort();
    ids
}
