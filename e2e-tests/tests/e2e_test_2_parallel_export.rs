// E2E Test 2: Parallel export
// Tests the complete flow: archive → index → partition → workers → batched files + rows

mod e2e;

use e2e::helpers::{mbox, MailSpec, TestEnv, TestResult};
use mbox_index::distributor::PartitionStrategy;
use mbox_index::index::IndexStore;
use mbox_index::pipeline::Pipeline;
use mbox_index::processor::EmlExportProcessor;
use mbox_index::writer::SqliteRowSink;
use std::time::Instant;

fn busy_archive() -> Vec<u8> {
    let threads = ["2001", "2002", "2003", "2004", "2005"];
    let bodies: Vec<String> = (0..120).map(|i| format!("Message number {}", i)).collect();

    let specs: Vec<MailSpec<'_>> = (0..120)
        .map(|i| MailSpec {
            from: if i % 3 == 0 { "ops@example.com" } else { "dev@example.org" },
            subject: "Status",
            thread: (i % 4 != 0).then(|| threads[i % threads.len()]),
            body: &bodies[i],
            ..Default::default()
        })
        .collect();
    mbox(&specs)
}

#[tokio::test]
async fn test_e2e_2_parallel_export() {
    let start = Instant::now();
    let test_name = "E2E Test 2: Parallel export".to_string();

    println!("\n🚀 Starting: {}", test_name);
    println!("{}", "=".repeat(80));

    let env = TestEnv::with_archive(&busy_archive());
    let mut config = env.config(6);
    config.workers.strategy = PartitionStrategy::GroupingKey;

    // Step 1: Index
    println!("\n📋 Step 1: Building index...");
    let index = IndexStore::from_config(&config)
        .build(&env.archive, &config.index_path(&env.archive))
        .await
        .expect("build");
    assert_eq!(index.len(), 120);
    println!("✅ Indexed {} messages", index.len());

    // Step 2: Export in parallel
    println!("\n📋 Step 2: Exporting with 6 workers...");
    let stats = Pipeline::new(config, &env.archive)
        .expect_count(120)
        .process(EmlExportProcessor::new())
        .await
        .expect("export");

    println!("{}", serde_json::to_string_pretty(&stats).expect("stats json"));
    assert_eq!(stats.attempted, 120);
    assert_eq!(stats.succeeded, 120);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.files_written, 120);
    assert_eq!(stats.rows_written, 120);
    assert!(stats.is_complete_success());
    println!("✅ All messages exported");

    // Step 3: Check files on disk
    println!("\n📋 Step 3: Checking output files...");
    let files = env.output_files();
    assert_eq!(files.len(), 120);
    assert!(files.iter().all(|f| f.ends_with(".eml")));
    assert!(files.contains(&"ungrouped/0.eml".to_string()));
    assert!(files.contains(&"2002/1.eml".to_string()));
    assert!(files.iter().all(|f| !f.contains(".tmp-")));

    let first = std::fs::read(env.output_dir().join("ungrouped/0.eml")).expect("read eml");
    assert!(first.starts_with(b"From: ops@example.com"));
    println!("✅ {} files in place", files.len());

    // Step 4: Check summary rows
    println!("\n📋 Step 4: Checking summary rows...");
    let rows = SqliteRowSink::connect(&env.database_url()).await.expect("open rows");
    assert_eq!(rows.count().await.expect("count"), 120);

    let row = rows.get("message-1").await.expect("get").expect("row exists");
    let payload: serde_json::Value = serde_json::from_str(&row.payload).expect("payload json");
    assert_eq!(payload["grouping_key"], "2002");
    assert_eq!(payload["secondary_key"], "example.org");
    assert_eq!(payload["file"], "2002/1.eml");

    let threads: i64 = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT json_extract(payload, '$.grouping_key')) FROM processed_items",
    )
    .fetch_one(rows.pool())
    .await
    .expect("distinct threads");
    assert_eq!(threads, 5);
    println!("✅ Rows match");

    let result = TestResult::success(test_name, start.elapsed());
    result.print();
}
