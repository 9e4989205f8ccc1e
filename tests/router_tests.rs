#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;

use http::Method;
use routecore::error::RouterError;
use routecore::pattern::Pattern;
use routecore::route::RouteSpec;
use routecore::router::{MatchResult, MatchStatus, Router};

mod common;
use common::named;

/// The verb zoo: every common method over a handful of paths
fn zoo() -> Router {
    let routes = [
        (Method::GET, "/", "root_handler"),
        (Method::GET, "/zoo/animals", "get_animals"),
        (Method::POST, "/zoo/animals", "create_animal"),
        (Method::GET, "/zoo/animals/{id}", "get_animal"),
        (Method::PUT, "/zoo/animals/{id}", "update_animal"),
        (Method::PATCH, "/zoo/animals/{id}", "patch_animal"),
        (Method::DELETE, "/zoo/animals/{id}", "delete_animal"),
        (Method::HEAD, "/zoo/health", "health_check"),
        (Method::OPTIONS, "/zoo/health", "supported_ops"),
        (Method::TRACE, "/zoo/health", "trace_route"),
    ];
    let mut router = Router::new();
    for (method, path, name) in routes {
        router
            .register(RouteSpec::new(method, path).name(name), named())
            .unwrap();
    }
    router.seal();
    router
}

fn assert_route_match(router: &Router, method: Method, path: &str, expected_name: &str) {
    let result = router.match_route(&method, path);
    let route = result
        .route()
        .unwrap_or_else(|| panic!("no match for {method} {path}: {:?}", result.status()));
    assert_eq!(route.name(), Some(expected_name), "{method} {path}");
}

#[test]
fn test_router_verb_zoo() {
    let router = zoo();
    assert_route_match(&router, Method::GET, "/", "root_handler");
    assert_route_match(&router, Method::GET, "/zoo/animals", "get_animals");
    assert_route_match(&router, Method::POST, "/zoo/animals", "create_animal");
    assert_route_match(&router, Method::GET, "/zoo/animals/7", "get_animal");
    assert_route_match(&router, Method::PUT, "/zoo/animals/7", "update_animal");
    assert_route_match(&router, Method::PATCH, "/zoo/animals/7", "patch_animal");
    assert_route_match(&router, Method::DELETE, "/zoo/animals/7", "delete_animal");
    assert_route_match(&router, Method::HEAD, "/zoo/health", "health_check");
    assert_route_match(&router, Method::OPTIONS, "/zoo/health", "supported_ops");
    assert_route_match(&router, Method::TRACE, "/zoo/health", "trace_route");
}

#[test]
fn test_literal_beats_param_in_any_order() {
    for literal_first in [true, false] {
        let mut router = Router::new();
        let literal = RouteSpec::new(Method::GET, "/users/me").name("me");
        let param = RouteSpec::new(Method::GET, "/users/{id}").name("by_id");
        if literal_first {
            router.register(literal, named()).unwrap();
            router.register(param, named()).unwrap();
        } else {
            router.register(param, named()).unwrap();
            router.register(literal, named()).unwrap();
        }

        assert_route_match(&router, Method::GET, "/users/me", "me");
        assert_route_match(&router, Method::GET, "/users/42", "by_id");
        assert_eq!(router.match_route(&Method::GET, "/users/42").param("id"), Some("42"));
    }
}

#[test]
fn test_param_beats_glob() {
    let mut router = Router::new();
    router
        .register(RouteSpec::new(Method::GET, "/files/{path}*").name("glob"), named())
        .unwrap();
    router
        .register(RouteSpec::new(Method::GET, "/files/{name}").name("single"), named())
        .unwrap();

    assert_route_match(&router, Method::GET, "/files/readme", "single");
    assert_route_match(&router, Method::GET, "/files/docs/readme", "glob");
}

#[test]
fn test_glob_captures_remainder() {
    let mut router = Router::new();
    router.get("/static/{path}*", named()).unwrap();

    let result = router.match_route(&Method::GET, "/static/css/site.css");
    assert_eq!(result.status(), MatchStatus::Matched);
    assert_eq!(result.param("path"), Some("css/site.css"));

    let result = router.match_route(&Method::GET, "/static");
    assert_eq!(result.param("path"), Some(""));
}

#[test]
fn test_anonymous_glob() {
    let mut router = Router::new();
    router.get("/proxy/*", named()).unwrap();
    let result = router.match_route(&Method::GET, "/proxy/a/b%20c");
    assert_eq!(result.param("*"), Some("a/b%20c"));
}

#[test]
fn test_method_not_allowed() {
    let mut router = Router::new();
    router.post("/login", named()).unwrap();

    match router.match_route(&Method::GET, "/login") {
        MatchResult::MethodNotAllowed { allowed } => assert_eq!(allowed, vec![Method::POST]),
        other => panic!("expected MethodNotAllowed, got {:?}", other.status()),
    }
    assert_eq!(router.allowed_methods("/login"), vec![Method::POST]);
}

#[test]
fn test_method_not_allowed_unions_structural_matches() {
    let mut router = Router::new();
    router.put("/docs/readme", named()).unwrap();
    router.delete("/docs/{name}", named()).unwrap();

    let result = router.match_route(&Method::GET, "/docs/readme");
    assert_eq!(result.allowed_methods(), &[Method::DELETE, Method::PUT]);
}

#[test]
fn test_not_found() {
    let router = zoo();
    assert_eq!(
        router.match_route(&Method::GET, "/zoo/keepers").status(),
        MatchStatus::NotFound
    );
    assert_eq!(
        router.match_route(&Method::GET, "/zoo/animals/7/extra").status(),
        MatchStatus::NotFound
    );
}

#[test]
fn test_query_and_fragment_are_ignored() {
    let router = zoo();
    assert_route_match(&router, Method::GET, "/zoo/animals?limit=10#top", "get_animals");
}

#[test]
fn test_any_method_route_yields_to_exact() {
    let mut router = Router::new();
    router
        .register(RouteSpec::any("/hook").name("any"), named())
        .unwrap();
    router
        .register(RouteSpec::new(Method::POST, "/hook").name("post"), named())
        .unwrap();

    assert_route_match(&router, Method::POST, "/hook", "post");
    assert_route_match(&router, Method::GET, "/hook", "any");
    assert_route_match(&router, Method::PATCH, "/hook", "any");
}

#[test]
fn test_percent_decoding_per_segment() {
    let mut router = Router::new();
    router.get("/users/{name}/files/{file}", named()).unwrap();

    let result = router.match_route(&Method::GET, "/users/John%20Doe/files/a%2Fb.txt");
    assert_eq!(result.param("name"), Some("John Doe"));
    assert_eq!(result.param("file"), Some("a/b.txt"));
}

#[test]
fn test_literal_segments_match_decoded() {
    let mut router = Router::new();
    router.get("/caf\u{e9}", named()).unwrap();
    assert_eq!(
        router.match_route(&Method::GET, "/caf%C3%A9").status(),
        MatchStatus::Matched
    );
}

#[test]
fn test_regex_constraint() {
    let mut router = Router::new();
    router
        .register(RouteSpec::new(Method::GET, "/orders/{id:[0-9]+}").name("numeric"), named())
        .unwrap();

    assert_route_match(&router, Method::GET, "/orders/123", "numeric");
    assert_eq!(
        router.match_route(&Method::GET, "/orders/abc").status(),
        MatchStatus::NotFound
    );
}

#[test]
fn test_regex_constraint_prefers_constrained_route() {
    let mut router = Router::new();
    router
        .register(RouteSpec::new(Method::GET, "/orders/{id}").name("any_id"), named())
        .unwrap();
    router
        .register(RouteSpec::new(Method::GET, "/orders/{id:[0-9]+}").name("numeric"), named())
        .unwrap();

    assert_route_match(&router, Method::GET, "/orders/123", "numeric");
    assert_route_match(&router, Method::GET, "/orders/latest", "any_id");
}

#[test]
fn test_ambiguous_param_names_rejected() {
    let mut router = Router::new();
    router.get("/users/{id}", named()).unwrap();

    let err = router.get("/users/{user_id}/posts", named()).unwrap_err();
    match err {
        RouterError::AmbiguousRoute { name, existing, .. } => {
            assert_eq!(name, "user_id");
            assert_eq!(existing, "id");
        }
        other => panic!("expected AmbiguousRoute, got {other}"),
    }
    assert_eq!(router.len(), 1);

    // different methods may name the position differently
    router.post("/users/{user_id}", named()).unwrap();
    let err = router.any("/users/{uid}", named()).unwrap_err();
    assert!(matches!(err, RouterError::AmbiguousRoute { .. }));
}

#[test]
fn test_pattern_syntax_error_surfaces() {
    let mut router = Router::new();
    let err = router.get("/broken/{id", named()).unwrap_err();
    assert!(matches!(err, RouterError::PatternSyntax { .. }));
    assert!(router.is_empty());
}

#[test]
fn test_seal_is_idempotent() {
    let mut router = Router::new();
    router.get("/a", named()).unwrap();
    router.seal();
    router.seal();
    assert!(router.is_sealed());
    assert_eq!(router.len(), 1);

    let err = router.get("/b", named()).unwrap_err();
    assert!(matches!(err, RouterError::Sealed { .. }));
    assert_eq!(router.match_route(&Method::GET, "/b").status(), MatchStatus::NotFound);
}

#[test]
fn test_substitution_round_trip() {
    let mut router = Router::new();
    let templates = [
        "/users/{id}",
        "/orgs/{org}/repos/{repo}",
        "/orders/{id:[0-9]+}/lines/{line}",
        "/assets/{bucket}/{key}*",
    ];
    for template in templates {
        router.get(template, named()).unwrap();
    }
    router.seal();

    let cases: Vec<(&str, HashMap<&str, &str>)> = vec![
        ("/users/{id}", HashMap::from([("id", "Ada Lovelace")])),
        (
            "/orgs/{org}/repos/{repo}",
            HashMap::from([("org", "rust-lang"), ("repo", "café?&#")]),
        ),
        (
            "/orders/{id:[0-9]+}/lines/{line}",
            HashMap::from([("id", "981"), ("line", "a/b")]),
        ),
        (
            "/assets/{bucket}/{key}*",
            HashMap::from([("bucket", "img"), ("key", "2024/logo.png")]),
        ),
    ];

    for (template, values) in cases {
        let pattern = Pattern::compile(template).unwrap();
        let path = pattern.expand(&values).unwrap();
        let result = router.match_route(&Method::GET, &path);
        let route = result.route().unwrap_or_else(|| panic!("{path} did not match"));
        assert_eq!(route.pattern().as_str(), template);
        for (name, value) in &values {
            assert_eq!(result.param(name), Some(*value), "{name} in {path}");
        }
    }
}

#[test]
fn test_routes_listed_in_registration_order() {
    let router = zoo();
    let names: Vec<_> = router.routes().iter().filter_map(|r| r.name()).collect();
    assert_eq!(names.first(), Some(&"root_handler"));
    assert_eq!(names.last(), Some(&"trace_route"));
    assert_eq!(router.len(), 10);
    router.dump_routes();
}
