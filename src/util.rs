use regex::Regex;

/// Shortens a fully qualified type name to something readable in logs, so
/// `dep_frame::dependency::ToggleDependency` becomes `ToggleDependency`.
pub fn short_name<T: ?Sized>() -> String {
    abs_to_rel_paths(std::any::type_name::<T>())
}

fn abs_to_rel_paths(s: &str) -> String {
    let re = Regex::new("[_a-zA-Z0-9]*::").unwrap();
    re.replace_all(s, "").into()
}

#[test]
fn abs_to_rel_paths_works() {
    assert_eq!("Engine", abs_to_rel_paths("dep_frame::engine::Engine"));
    assert_eq!(
        "ToggleDependency",
        abs_to_rel_paths("dep_frame::dependency::ToggleDependency")
    );
    assert_eq!(
        "Holder<Arc<dyn Lifecycle>>",
        abs_to_rel_paths(
            "some::path::Holder<alloc::sync::Arc<dyn dep_frame::dispatcher::Lifecycle>>"
        )
    );
    assert_eq!(
        "(ComponentId, DependencyId)",
        abs_to_rel_paths("(dep_frame::engine::ComponentId, dep_frame::engine::DependencyId)")
    );
}
