use construct_core::meta::KEYWORDS;
use construct_core::{
    child_by_path, Collection, ConstructError, ContentType, InMemoryCache, InMemoryRemote,
    LoadState, RepositorySpec, SharedCache, SqliteCache, SyncOptions, Synchronizer, TreeNode,
};
use std::sync::Arc;
use tempfile::TempDir;

fn synchronizer(remote: &Arc<InMemoryRemote>) -> Synchronizer {
    Synchronizer::new(remote.clone(), Arc::new(InMemoryCache::new()))
}

fn spec(s: &str) -> RepositorySpec {
    RepositorySpec::parse(s).unwrap()
}

fn paths(tree: &[TreeNode]) -> Vec<String> {
    let mut out = Vec::new();
    for node in tree {
        out.push(node.path().to_string());
        out.extend(paths(node.children()));
    }
    out
}

async fn reload(sync: &Synchronizer, collection: &mut Collection) -> construct_core::ReloadReport {
    sync.reload(collection, &SyncOptions::default(), &mut |_| {})
        .await
        .unwrap()
}

#[tokio::test]
async fn test_two_repositories_merge_into_one_tree() {
    let remote = Arc::new(InMemoryRemote::new());
    remote.add_repository("acme/base", "main");
    remote.commit(
        "acme/base",
        "main",
        "t1",
        &[
            ("a/part.step", "base"),
            ("a/part.json", r#"{"keywords": "alpha Beta", "title": "Bracket"}"#),
            ("z.dxf", "plate"),
        ],
    );
    remote.add_repository("acme/extra", "main");
    remote.commit(
        "acme/extra",
        "main",
        "t2",
        &[
            ("a/part.f3d", "extra"),
            ("a/part.step", "extra"),
            ("a/_meta.json", r#"{"part": {"keywords": "beta gamma"}}"#),
            ("b/preview.png", "png"),
        ],
    );

    let sync = synchronizer(&remote);
    let mut collection = Collection::repo("Parts", vec![spec("acme/base"), spec("acme/extra")]);
    let report = reload(&sync, &mut collection).await;
    assert!(report.failures.is_empty());
    assert_eq!(collection.load_state, LoadState::Loaded);

    // b/ only has a preview and _meta is consumed by the indexer
    assert_eq!(paths(&collection.children), vec!["a", "a/part", "z"]);

    let part = child_by_path(&collection.children, "a/part")
        .and_then(TreeNode::as_blob)
        .unwrap();
    assert!(part.id.starts_with(&format!("{}|a/part.", collection.id)));
    assert_eq!(part.content_types[&ContentType::Step].source_repo, "acme/extra");
    assert_eq!(part.content_types[&ContentType::F3d].source_repo, "acme/extra");
    let meta = part.meta.as_ref().unwrap();
    assert_eq!(meta[KEYWORDS], "alpha Beta gamma");
    assert_eq!(meta["title"], "Bracket");

    let dir = child_by_path(&collection.children, "a").unwrap();
    assert_eq!(dir.sources(), ["t1:a/".to_string(), "t2:a/".to_string()]);
}

#[tokio::test]
async fn test_subpath_is_rerooted() {
    let remote = Arc::new(InMemoryRemote::new());
    remote.add_repository("acme/hardware", "main");
    remote.commit(
        "acme/hardware",
        "main",
        "t1",
        &[("fasteners/m3/bolt.step", "x"), ("fasteners/nut.stp", "x"), ("other/gear.dxf", "x")],
    );

    let sync = synchronizer(&remote);
    let mut collection = Collection::repo("Fasteners", vec![spec("acme/hardware/fasteners")]);
    reload(&sync, &mut collection).await;

    assert_eq!(paths(&collection.children), vec!["m3", "m3/bolt", "nut"]);
    let bolt = child_by_path(&collection.children, "m3/bolt").unwrap();
    assert_eq!(bolt.id(), format!("{}|m3/bolt.step", collection.id));
}

#[tokio::test]
async fn test_subpath_metadata_independent_of_root_collection() {
    let remote = Arc::new(InMemoryRemote::new());
    remote.add_repository("acme/parts", "main");
    remote.commit(
        "acme/parts",
        "main",
        "t1",
        &[
            ("hw/nut.step", "x"),
            ("hw/_meta.json", r#"{"nut": {"keywords": "hex"}}"#),
            ("nut.step", "x"),
        ],
    );

    // both collections share one cache
    let sync = synchronizer(&remote);
    let mut root = Collection::repo("All", vec![spec("acme/parts")]);
    reload(&sync, &mut root).await;
    let top_nut = child_by_path(&root.children, "nut").and_then(TreeNode::as_blob).unwrap();
    assert!(top_nut.meta.is_none());

    let mut hw = Collection::repo("Hardware", vec![spec("acme/parts/hw")]);
    reload(&sync, &mut hw).await;
    let nut = child_by_path(&hw.children, "nut").and_then(TreeNode::as_blob).unwrap();
    let keywords = nut.meta.as_ref().and_then(|m| m.get(KEYWORDS)).and_then(|k| k.as_str());
    assert_eq!(keywords, Some("hex"));

    // and the root collection is still served correctly afterwards
    reload(&sync, &mut root).await;
    let top_nut = child_by_path(&root.children, "nut").and_then(TreeNode::as_blob).unwrap();
    assert!(top_nut.meta.is_none());
    let nested = child_by_path(&root.children, "hw/nut").and_then(TreeNode::as_blob).unwrap();
    assert_eq!(nested.meta.as_ref().unwrap()[KEYWORDS], "hex");
}

#[tokio::test]
async fn test_empty_repository_contributes_nothing() {
    let remote = Arc::new(InMemoryRemote::new());
    remote.add_repository("acme/empty", "main");
    remote.add_repository("acme/parts", "main");
    remote.commit("acme/parts", "main", "t1", &[("part.step", "x")]);

    let sync = synchronizer(&remote);
    let mut collection = Collection::repo("Parts", vec![spec("acme/empty"), spec("acme/parts")]);
    let report = reload(&sync, &mut collection).await;

    assert!(report.failures.is_empty());
    assert_eq!(paths(&collection.children), vec!["part"]);
}

#[tokio::test]
async fn test_failed_repository_does_not_abort_siblings() {
    let remote = Arc::new(InMemoryRemote::new());
    remote.add_repository("acme/parts", "main");
    remote.commit("acme/parts", "main", "t1", &[("part.step", "x"), ("sub/gear.dxf", "x")]);

    let sync = synchronizer(&remote);
    let mut collection = Collection::repo(
        "Parts",
        vec![
            spec("acme/missing"),
            spec("acme/parts#dev"),
            spec("acme/parts/nope"),
            spec("acme/parts"),
        ],
    );
    let report = reload(&sync, &mut collection).await;

    let failed: Vec<&str> = report.failures.iter().map(|f| f.spec.as_str()).collect();
    assert_eq!(failed, vec!["acme/missing", "acme/parts#dev", "acme/parts/nope"]);
    assert!(matches!(report.failures[0].error, ConstructError::NotFound { .. }));
    assert!(matches!(report.failures[2].error, ConstructError::InvalidPath(_)));
    assert_eq!(paths(&collection.children), vec!["sub", "sub/gear", "part"]);
    assert_eq!(collection.load_state, LoadState::Loaded);
}

#[tokio::test]
async fn test_reload_reuses_durable_cache() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(InMemoryRemote::new());
    remote.add_repository("acme/parts", "main");
    remote.commit(
        "acme/parts",
        "main",
        "t1",
        &[("a/part.step", "x"), ("a/part.json", r#"{"title": "Bracket"}"#)],
    );

    let open = || -> SharedCache { Arc::new(SqliteCache::open(&dir.path().join("cache.db")).unwrap()) };
    let mut collection = Collection::repo("Parts", vec![spec("acme/parts")]);

    let first = Synchronizer::new(remote.clone(), open());
    reload(&first, &mut collection).await;
    let first_tree = collection.children.clone();
    assert_eq!(remote.tree_fetches(), 1);
    let blob_fetches = remote.blob_fetches();
    assert_eq!(blob_fetches, 1);

    // new process, same database
    let second = Synchronizer::new(remote.clone(), open());
    let report = reload(&second, &mut collection).await;
    assert_eq!(remote.tree_fetches(), 1);
    assert_eq!(remote.blob_fetches(), blob_fetches);
    assert_eq!(report.stats.cache_misses, 0);
    assert_eq!(collection.children, first_tree);

    // head moves: one listing fetch, new side-car downloaded
    remote.commit(
        "acme/parts",
        "main",
        "t2",
        &[("a/part.step", "y"), ("a/part.json", r#"{"title": "Bracket v2"}"#)],
    );
    reload(&second, &mut collection).await;
    assert_eq!(remote.tree_fetches(), 2);
    let part = child_by_path(&collection.children, "a/part")
        .and_then(TreeNode::as_blob)
        .unwrap();
    assert_eq!(part.meta.as_ref().unwrap()["title"], "Bracket v2");
}

#[tokio::test]
async fn test_without_index_skips_side_cars() {
    let remote = Arc::new(InMemoryRemote::new());
    remote.add_repository("acme/parts", "main");
    remote.commit(
        "acme/parts",
        "main",
        "t1",
        &[("part.step", "x"), ("part.json", "{}"), ("_meta.json", "{}")],
    );

    let sync = synchronizer(&remote);
    let outcome = sync
        .merged_tree("c", &[spec("acme/parts")], &SyncOptions { index: false }, &mut |_| {})
        .await
        .unwrap();
    assert_eq!(remote.blob_fetches(), 0);
    assert!(outcome.stats.is_none());
    // the manifest has no model facet and is pruned
    assert_eq!(paths(&outcome.tree), vec!["part"]);
    assert_eq!(outcome.tree_shas, vec!["t1".to_string()]);
}

#[tokio::test]
async fn test_org_collection_drops_empty_members() {
    let remote = Arc::new(InMemoryRemote::new());
    remote.add_repository("acme/parts", "main");
    remote.commit("acme/parts", "main", "t1", &[("part.step", "x")]);
    remote.add_repository("acme/docs", "main");
    remote.commit("acme/docs", "main", "t2", &[("README.md", "x")]);
    remote.add_repository("acme/empty", "trunk");
    remote.add_repository("acme/tools", "trunk");
    remote.commit("acme/tools", "trunk", "t3", &[("jig.f3d", "x")]);
    remote.add_repository("other/parts", "main");
    remote.commit("other/parts", "main", "t4", &[("x.step", "x")]);

    let sync = synchronizer(&remote);
    let mut org = Collection::org("Acme", "acme");
    let report = reload(&sync, &mut org).await;

    assert!(report.failures.is_empty());
    assert_eq!(org.load_state, LoadState::Loaded);
    let names: Vec<&str> = org.members.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["parts", "tools"]);
    assert_eq!(report.nodes, 2);

    let tools = &org.members[1];
    assert_eq!(tools.repositories[0].branch.as_deref(), Some("trunk"));
    assert_eq!(tools.children[0].id(), format!("{}|jig.f3d", tools.id));
    assert!(org.find(&tools.id).is_some());
}
