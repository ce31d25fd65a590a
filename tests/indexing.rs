use std::fs;
use std::path::Path;

use symgraph::graph::DependencyGraphBuilder;
use symgraph::index::persist::SymbolWorkflow;
use symgraph::indexer::pipeline::FileOutcome;
use symgraph::Indexer;
use tempfile::{tempdir, TempDir};

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn go_project() -> TempDir {
    let dir = tempdir().unwrap();
    write(dir.path(), "a.go", "package demo\n\nfunc Foo() int {\n\treturn 1\n}\n");
    write(dir.path(), "b.go", "package demo\n\nfunc Bar() int {\n\treturn Foo()\n}\n");
    write(
        dir.path(),
        "pkg/util.py",
        "def helper(x):\n    return x + 1\n\n\ndef run():\n    return helper(2)\n",
    );
    write(dir.path(), "README.md", "# demo\n");
    write(dir.path(), "target/debug/gen.rs", "fn generated() {}\n");
    dir
}

#[tokio::test]
async fn test_full_index_counts_files() {
    let dir = go_project();
    let mut indexer = Indexer::open(dir.path()).await.unwrap();

    let report = indexer.index_all(indexer.options()).await.unwrap();

    assert!(!report.cancelled);
    assert!(!report.has_errors(), "{:?}", report.errors);
    assert_eq!(report.files_indexed, 3);
    assert_eq!(report.files_skipped, 1);
    assert!(report.stats.symbols_inserted >= 4);

    let project = report.project.unwrap();
    assert_eq!(project.language_stats.get("go"), Some(&2));
    assert_eq!(project.language_stats.get("python"), Some(&1));
    assert!(project.last_indexed.is_some());

    // Excluded directories never reach the index
    assert!(indexer.db().find_symbols_by_name("generated").unwrap().is_empty());
}

#[tokio::test]
async fn test_second_pass_writes_nothing() {
    let dir = go_project();
    let mut indexer = Indexer::open(dir.path()).await.unwrap();
    indexer.index_all(indexer.options()).await.unwrap();

    let again = indexer.index_all(indexer.options()).await.unwrap();
    assert_eq!(again.files_unchanged, 3);
    assert_eq!(again.files_indexed, 0);
    assert_eq!(again.stats.symbols_written(), 0);

    let mut forced = indexer.options();
    forced.force = true;
    let rebuilt = indexer.index_all(forced).await.unwrap();
    assert_eq!(rebuilt.files_indexed, 3);
    assert_eq!(rebuilt.stats.symbols_written(), 0);
    assert!(rebuilt.stats.symbols_unchanged >= 4);
}

#[tokio::test]
async fn test_deleted_files_are_pruned() {
    let dir = go_project();
    let mut indexer = Indexer::open(dir.path()).await.unwrap();
    indexer.index_all(indexer.options()).await.unwrap();
    assert_eq!(indexer.db().find_symbols_by_name("Bar").unwrap().len(), 1);

    fs::remove_file(dir.path().join("b.go")).unwrap();
    let report = indexer.index_all(indexer.options()).await.unwrap();

    assert_eq!(report.files_removed, 1);
    assert!(indexer.db().find_symbols_by_name("Bar").unwrap().is_empty());
    assert!(indexer.db().references_to("Foo", None).unwrap().is_empty());
}

#[tokio::test]
async fn test_workflow_survives_reindex() {
    let dir = go_project();
    let mut indexer = Indexer::open(dir.path()).await.unwrap();
    indexer.index_all(indexer.options()).await.unwrap();

    let foo = indexer.db().find_symbols_by_name("Foo").unwrap().remove(0);
    let workflow = SymbolWorkflow {
        status: Some("in_progress".to_string()),
        priority: Some(2),
        assigned_agent: Some("agent-7".to_string()),
    };
    assert!(indexer.set_workflow(foo.id, workflow).await.unwrap());

    // Change Foo's body so its row is rewritten
    write(dir.path(), "a.go", "package demo\n\nfunc Foo() int {\n\treturn 2\n}\n");
    let report = indexer.index_all(indexer.options()).await.unwrap();
    assert_eq!(report.stats.symbols_updated, 1);

    let foo = indexer.db().find_symbols_by_name("Foo").unwrap().remove(0);
    assert_eq!(foo.status.as_deref(), Some("in_progress"));
    assert_eq!(foo.priority, Some(2));
    assert_eq!(foo.assigned_agent.as_deref(), Some("agent-7"));
}

#[tokio::test]
async fn test_broken_source_is_indexed_partially() {
    let dir = go_project();
    write(dir.path(), "broken.go", "package demo\n\nfunc Good() {}\n\nfunc Bad( {\n");

    let mut indexer = Indexer::open(dir.path()).await.unwrap();
    let report = indexer.index_all(indexer.options()).await.unwrap();

    assert!(!report.has_errors());
    assert_eq!(report.files_indexed, 4);
    assert_eq!(indexer.db().find_symbols_by_name("Good").unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancelled_run_skips_finalisation() {
    let dir = go_project();
    let mut indexer = Indexer::open(dir.path()).await.unwrap();

    let options = indexer.options();
    options.cancel.cancel();
    let report = indexer.index_all(options).await.unwrap();

    assert!(report.cancelled);
    assert!(report.project.is_none());
    assert_eq!(report.files_removed, 0);
}

#[tokio::test]
async fn test_single_file_updates() {
    let dir = go_project();
    let mut indexer = Indexer::open(dir.path()).await.unwrap();
    indexer.index_all(indexer.options()).await.unwrap();

    write(dir.path(), "c.go", "package demo\n\nfunc Baz() int {\n\treturn Foo() + Bar()\n}\n");
    let outcome = indexer.index_file(dir.path().join("c.go")).await.unwrap();
    assert!(matches!(outcome, FileOutcome::Indexed { .. }));

    let foo = indexer.db().find_symbols_by_name("Foo").unwrap().remove(0);
    let refs = indexer.db().references_to("Foo", Some(foo.id)).unwrap();
    assert_eq!(refs.len(), 2);
    assert!(refs.iter().all(|r| r.target_symbol_id == Some(foo.id)));

    let unchanged = indexer.index_file(dir.path().join("c.go")).await.unwrap();
    assert!(matches!(unchanged, FileOutcome::Unchanged { .. }));

    assert!(indexer.remove_file(dir.path().join("c.go")).await.unwrap());
    assert!(indexer.db().find_symbols_by_name("Baz").unwrap().is_empty());
}

const FOO_A: &str = "package a\n\nfunc Foo() int {\n\treturn 1\n}\n";
const BAR_B: &str = "package b\n\nfunc Bar() int {\n\treturn Foo()\n}\n";
const FOO_C: &str = "package c\n\nfunc Foo() int {\n\treturn 2\n}\n";

#[tokio::test]
async fn test_new_duplicate_name_unlinks_like_a_fresh_index() {
    let dir = tempdir().unwrap();
    write(dir.path(), "a/a.go", FOO_A);
    write(dir.path(), "b/b.go", BAR_B);

    let mut indexer = Indexer::open(dir.path()).await.unwrap();
    indexer.index_all(indexer.options()).await.unwrap();
    assert!(indexer.db().references_to("Foo", None).unwrap()[0].target_symbol_id.is_some());

    write(dir.path(), "c/c.go", FOO_C);
    indexer.index_all(indexer.options()).await.unwrap();

    let refs = indexer.db().references_to("Foo", None).unwrap();
    assert_eq!(refs.len(), 1);
    assert!(refs[0].target_symbol_id.is_none());

    let graph = DependencyGraphBuilder::new(indexer.db().clone())
        .build_symbol_dependency_graph("Bar", None)
        .unwrap();
    assert!(graph.warnings.iter().any(|w| w.starts_with("'Foo' is defined 2 times")));

    // A fresh index of the same tree agrees
    let other = tempdir().unwrap();
    write(other.path(), "a/a.go", FOO_A);
    write(other.path(), "b/b.go", BAR_B);
    write(other.path(), "c/c.go", FOO_C);
    let mut fresh = Indexer::open(other.path()).await.unwrap();
    fresh.index_all(fresh.options()).await.unwrap();

    let fresh_refs = fresh.db().references_to("Foo", None).unwrap();
    assert_eq!(fresh_refs.len(), 1);
    assert!(fresh_refs[0].target_symbol_id.is_none());
    let fresh_graph = DependencyGraphBuilder::new(fresh.db().clone())
        .build_symbol_dependency_graph("Bar", None)
        .unwrap();
    assert_eq!(fresh_graph.warnings, graph.warnings);
}

#[tokio::test]
async fn test_shifted_caller_keeps_its_dependents() {
    let dir = go_project();
    let mut indexer = Indexer::open(dir.path()).await.unwrap();
    indexer.index_all(indexer.options()).await.unwrap();

    // Same Bar, three lines further down
    write(dir.path(), "b.go", "package demo\n\n\n\n\nfunc Bar() int {\n\treturn Foo()\n}\n");
    let report = indexer.index_all(indexer.options()).await.unwrap();
    assert_eq!(report.stats.symbols_written(), 0);
    assert_eq!(report.stats.symbols_moved, 1);

    let bar = indexer.db().find_symbols_by_name("Bar").unwrap().remove(0);
    assert_eq!(bar.range.start_line, 6);

    let dependents = DependencyGraphBuilder::new(indexer.db().clone())
        .get_dependents_for("Foo")
        .unwrap();
    assert_eq!(dependents.len(), 1);
    assert_eq!(dependents[0].name, "Bar");
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreadable_directory_fails_the_run() {
    use std::os::unix::fs::PermissionsExt;

    let dir = go_project();
    let locked = dir.path().join("locked");
    write(dir.path(), "locked/c.go", "package demo\n");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    // Permission bits do not bind root
    let readable = fs::read_dir(&locked).is_ok();

    let mut indexer = Indexer::open(dir.path()).await.unwrap();
    let result = indexer.index_all(indexer.options()).await;
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    if !readable {
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("Failed to walk"));
    }
}
