use camino::Utf8PathBuf;
use std::fs;
use tempfile::TempDir;
use vellum::{
    CacheStore, Origin, Scope, StorageAction, ViewEngine, ViewError, ViewName, ViewResolver,
};
use vellum_testhelpers::IPanic;

fn scratch() -> (TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    (dir, root)
}

#[test]
fn compiled_entries_outlive_source_edits() -> Result<(), IPanic> {
    vellum_testhelpers::setup();

    let (_dir, root) = scratch();
    fs::write(root.join("v.html"), "first {{ n }}")?;
    let engine = ViewEngine::new(&root, &root);

    assert_eq!(engine.render("v", Scope::from_iter([("n", 1)]))?, "first 1");
    let entry = root.join("v.compiled.vlm");
    assert_eq!(fs::read_to_string(&entry)?, "first <%= n %>");

    fs::write(root.join("v.html"), "second {{ n }}")?;
    assert_eq!(engine.render("v", Scope::from_iter([("n", 2)]))?, "first 2");

    assert_eq!(engine.clear_cache()?, 1);
    assert!(!entry.exists());
    assert_eq!(engine.render("v", Scope::from_iter([("n", 3)]))?, "second 3");
    Ok(())
}

#[test]
fn nested_names_get_flat_entries() -> Result<(), IPanic> {
    vellum_testhelpers::setup();

    let (_dir, root) = scratch();
    fs::create_dir_all(root.join("views/layouts"))?;
    fs::write(root.join("views/layouts/header.html"), "<header/>")?;
    let engine = ViewEngine::new(root.join("views"), root.join("cache"));

    assert_eq!(engine.source_root(), root.join("views"));
    assert_eq!(engine.cache_root(), root.join("cache"));
    assert_eq!(engine.render("layouts.header", Scope::new())?, "<header/>");
    assert!(root.join("cache/layouts.header.compiled.vlm").is_file());
    Ok(())
}

#[test]
fn resolver_reports_where_a_fragment_came_from() -> Result<(), IPanic> {
    vellum_testhelpers::setup();

    let (_dir, root) = scratch();
    fs::write(root.join("markup.html"), "{{ x }}")?;
    fs::write(root.join("native.vlm"), "<%= x %>")?;
    let resolver = ViewResolver::new(&root, CacheStore::new(root.join("cache")), false);

    let markup = ViewName::parse("markup")?;
    let first = resolver.resolve(&markup)?;
    assert_eq!(first.origin, Origin::Compiled);
    assert_eq!(first.path, root.join("cache/markup.compiled.vlm"));
    assert_eq!(resolver.resolve(&markup)?.origin, Origin::Cached);

    let native = resolver.resolve(&ViewName::parse("native")?)?;
    assert_eq!(native.origin, Origin::Native);
    assert_eq!(native.path, root.join("native.vlm"));
    Ok(())
}

#[test]
fn clearing_an_empty_root_is_a_no_op() -> Result<(), IPanic> {
    vellum_testhelpers::setup();

    let (_dir, root) = scratch();
    let engine = ViewEngine::new(&root, &root);
    assert_eq!(engine.clear_cache()?, 0);
    assert_eq!(fs::read_dir(&root)?.count(), 0);
    Ok(())
}

#[test]
fn clearing_leaves_other_files_alone() -> Result<(), IPanic> {
    vellum_testhelpers::setup();

    let (_dir, root) = scratch();
    fs::write(root.join("a.html"), "a")?;
    fs::write(root.join("b.html"), "b")?;
    fs::create_dir_all(root.join("layouts"))?;
    fs::write(root.join("layouts/footer.html"), "footer")?;
    fs::write(root.join("notes.txt"), "keep me")?;
    fs::write(root.join("native.vlm"), "keep me too")?;
    fs::create_dir_all(root.join("nested"))?;
    fs::write(root.join("nested/old.compiled.vlm"), "not at the top level")?;

    let engine = ViewEngine::new(&root, &root);
    for name in ["a", "b", "layouts.footer"] {
        engine.render(name, Scope::new())?;
    }

    assert_eq!(engine.clear_cache()?, 3);

    let mut left: Vec<String> = fs::read_dir(&root)?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<Result<_, _>>()?;
    left.sort();
    insta::assert_debug_snapshot!(left, @r#"
    [
        "a.html",
        "b.html",
        "layouts",
        "native.vlm",
        "nested",
        "notes.txt",
    ]
    "#);
    assert!(root.join("nested/old.compiled.vlm").is_file());
    Ok(())
}

#[test]
fn clearing_a_missing_root_fails() {
    vellum_testhelpers::setup();

    let (_dir, root) = scratch();
    let engine = ViewEngine::new(&root, root.join("never-created"));
    let err = engine.clear_cache().unwrap_err();
    let ViewError::Storage { action, path, .. } = err else {
        panic!("expected a storage error");
    };
    assert_eq!(action, StorageAction::ListDir);
    assert_eq!(path, root.join("never-created"));
}
