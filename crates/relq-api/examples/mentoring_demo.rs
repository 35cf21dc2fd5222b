//! Mentoring schema example: inferred relations, nested includes, cursor
//! paging and both relation load strategies over the in-memory executor.

use relq::logging::LogConfig;
use relq::{
    Catalog, ColumnDef, CountArgs, FindManyArgs, MemoryExecutor, QueryEngine,
    RelationLoadStrategy, Result, Row, TableDef, Value,
};
use serde_json::json;

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

fn catalog() -> Catalog {
    Catalog::new(vec![
        TableDef::new("Mentor")
            .column(ColumnDef::text("id").primary_key())
            .column(ColumnDef::text("name")),
        TableDef::new("Contract")
            .column(ColumnDef::text("id").primary_key())
            .column(ColumnDef::text("status"))
            .column(ColumnDef::text("mentorId").references("Mentor", "id")),
        TableDef::new("Session")
            .column(ColumnDef::text("id").primary_key())
            .column(ColumnDef::text("contractId").references("Contract", "id"))
            .column(ColumnDef::integer("minutes")),
    ])
}

fn seed(executor: &MemoryExecutor) -> Result<()> {
    executor.insert_rows(
        "Mentor",
        [("m1", "Ada"), ("m2", "Grace")]
            .into_iter()
            .map(|(id, name)| row(&[("id", id.into()), ("name", name.into())])),
    )?;
    executor.insert_rows(
        "Contract",
        [
            ("k1", "active", "m1"),
            ("k2", "ended", "m1"),
            ("k3", "active", "m2"),
        ]
        .into_iter()
        .map(|(id, status, mentor)| {
            row(&[
                ("id", id.into()),
                ("status", status.into()),
                ("mentorId", mentor.into()),
            ])
        }),
    )?;
    executor.insert_rows(
        "Session",
        [("s1", "k1", 30), ("s2", "k1", 45), ("s3", "k3", 60)]
            .into_iter()
            .map(|(id, contract, minutes)| {
                row(&[
                    ("id", id.into()),
                    ("contractId", contract.into()),
                    ("minutes", minutes.into()),
                ])
            }),
    )
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Statement text is logged at trace level
    let _guard = LogConfig::sql().init();

    println!("=== relq Mentoring Demo ===\n");

    let executor = MemoryExecutor::new();
    seed(&executor)?;
    let engine = QueryEngine::from_catalog(&catalog(), executor.clone());

    println!("Inferred relations:");
    for table in ["Mentor", "Contract", "Session"] {
        for relation in engine.registry().get_relations(table) {
            println!(
                "  {}.{} -> {} ({:?})",
                table, relation.name, relation.target_table, relation.kind
            );
        }
    }

    println!("\n1. Active contracts with mentor and long sessions (join strategy)...");
    let query: FindManyArgs = serde_json::from_value(json!({
        "where": {"status": "active"},
        "include": {
            "mentor": {"select": {"name": true}},
            "sessions": {"where": {"minutes": {"gte": 45}}}
        },
        "orderBy": {"id": "asc"}
    }))?;
    let joined = engine.find_many("Contract", &query).await?;
    println!("{}", serde_json::to_string_pretty(&joined)?);

    println!("\n2. Same query with one statement per relation...");
    let separate = query.clone().with_strategy(RelationLoadStrategy::Query);
    let stitched = engine.find_many("Contract", &separate).await?;
    println!("Results equal: {}", joined == stitched);

    println!("\n3. Cursor paging through contracts, one at a time...");
    let mut cursor: Option<String> = None;
    loop {
        let mut descriptor = json!({"orderBy": {"id": "asc"}, "take": 1});
        if let Some(last) = &cursor {
            descriptor["cursor"] = json!({"id": last});
        }
        let page = engine
            .find_many("Contract", &serde_json::from_value(descriptor)?)
            .await?;
        let Some(record) = page.first() else {
            break;
        };
        let id = record["id"].as_str().unwrap_or_default().to_string();
        println!("  page: {}", id);
        cursor = Some(id);
    }

    println!("\n4. Counting mentors with an active contract...");
    let filter = serde_json::from_value(json!({"contracts": {"status": "active"}}))?;
    let count = engine
        .count("Mentor", &CountArgs { filter: Some(filter) })
        .await?;
    println!("  {} mentors", count);

    println!("\nStatements issued: {}", executor.statements().len());
    println!("\n=== Demo Complete ===");

    Ok(())
}
