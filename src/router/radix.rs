//! Segment-keyed route trie shared by every HTTP method
//!
//! Each node represents one path segment. Literal children are indexed by
//! their text; parameter and glob children carry the name they bind and the
//! set of methods registered through them, which is what lets the trie reject
//! two competing names for the same position and method while still allowing
//! `GET /users/{id}` next to `POST /users/{user_id}`.
//!
//! Routes live on terminal nodes: a per-method list plus an any-method list,
//! both kept in descending [`crate::pattern::Specificity`] order with stable
//! insertion so the first registered route wins exact ties.
//!
//! Lookup walks literal children first, then parameter children, then globs,
//! backtracking when a branch yields nothing. Lookup cost is bounded by the
//! path depth and the fan-out of parameter children, not by the route count.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use smallvec::SmallVec;

use super::core::ParamVec;
use crate::error::RouterError;
use crate::pattern::{Pattern, Segment};
use crate::route::{Route, RouteMethod};

/// Segments kept inline before the request path spills to the heap
const INLINE_SEGMENTS: usize = 16;

/// A request path split into raw and percent-decoded segments
///
/// The query string and fragment are dropped, empty segments (duplicate or
/// trailing slashes) are skipped. Each segment is decoded on its own, so an
/// encoded `%2F` stays inside its segment. A segment that does not decode to
/// valid UTF-8 is kept raw.
pub(crate) struct RequestPath<'p> {
    raw: SmallVec<[&'p str; INLINE_SEGMENTS]>,
    decoded: SmallVec<[Cow<'p, str>; INLINE_SEGMENTS]>,
}

impl<'p> RequestPath<'p> {
    pub(crate) fn parse(path: &'p str) -> Self {
        let end = path.find(['?', '#']).unwrap_or(path.len());
        let raw: SmallVec<[&'p str; INLINE_SEGMENTS]> =
            path[..end].split('/').filter(|s| !s.is_empty()).collect();
        let decoded = raw
            .iter()
            .map(|&segment| {
                if segment.contains('%') {
                    urlencoding::decode(segment).unwrap_or(Cow::Borrowed(segment))
                } else {
                    Cow::Borrowed(segment)
                }
            })
            .collect();
        Self { raw, decoded }
    }

    fn len(&self) -> usize {
        self.raw.len()
    }

    fn segment(&self, idx: usize) -> &str {
        &self.decoded[idx]
    }

    /// Undecoded remainder of the path starting at segment `idx`
    fn remainder(&self, idx: usize) -> String {
        self.raw[idx..].join("/")
    }
}

/// A parameter or glob edge
struct NamedChild {
    name: Arc<str>,
    methods: Vec<RouteMethod>,
    node: TrieNode,
}

#[derive(Default)]
struct TrieNode {
    literals: HashMap<String, TrieNode>,
    params: Vec<NamedChild>,
    globs: Vec<NamedChild>,
    routes: HashMap<Method, Vec<Arc<Route>>>,
    any: Vec<Arc<Route>>,
}

#[derive(Clone, Copy)]
enum EdgeKind {
    Param,
    Glob,
}

impl TrieNode {
    fn edges(&self, kind: EdgeKind) -> &[NamedChild] {
        match kind {
            EdgeKind::Param => &self.params,
            EdgeKind::Glob => &self.globs,
        }
    }

    fn edges_mut(&mut self, kind: EdgeKind) -> &mut Vec<NamedChild> {
        match kind {
            EdgeKind::Param => &mut self.params,
            EdgeKind::Glob => &mut self.globs,
        }
    }

    fn has_routes(&self) -> bool {
        !self.routes.is_empty() || !self.any.is_empty()
    }

    /// Descend to (creating if needed) the named edge, annotating it with `method`
    fn named_child(&mut self, kind: EdgeKind, name: &Arc<str>, method: &RouteMethod) -> &mut TrieNode {
        let edges = self.edges_mut(kind);
        let idx = match edges.iter().position(|c| c.name == *name) {
            Some(idx) => idx,
            None => {
                edges.push(NamedChild {
                    name: Arc::clone(name),
                    methods: Vec::new(),
                    node: TrieNode::default(),
                });
                edges.len() - 1
            }
        };
        let child = &mut edges[idx];
        if !child.methods.contains(method) {
            child.methods.push(method.clone());
        }
        &mut child.node
    }

    fn push_route(&mut self, route: Arc<Route>) {
        let list = match route.method() {
            RouteMethod::Exact(m) => self.routes.entry(m.clone()).or_default(),
            RouteMethod::Any => &mut self.any,
        };
        let specificity = route.pattern().specificity();
        let at = list
            .iter()
            .position(|r| r.pattern().specificity() < specificity)
            .unwrap_or(list.len());
        list.insert(at, route);
    }

    /// Route on this node serving `method` whose constraints accept `params`
    fn select(&self, method: &Method, params: &ParamVec) -> Option<&Arc<Route>> {
        self.routes
            .get(method)
            .and_then(|routes| routes.iter().find(|r| r.pattern().accepts(params)))
            .or_else(|| self.any.iter().find(|r| r.pattern().accepts(params)))
    }

    /// Add every exact method on this node that would accept `params`
    fn collect_methods(&self, params: &ParamVec, out: &mut Vec<Method>) {
        for (method, routes) in &self.routes {
            if !out.contains(method) && routes.iter().any(|r| r.pattern().accepts(params)) {
                out.push(method.clone());
            }
        }
    }

    /// Depth-first walk over every terminal node structurally matching `path`.
    ///
    /// `visit` returns `true` to stop; the captures of the stopping branch are
    /// left in `params`.
    fn walk<F>(&self, path: &RequestPath<'_>, idx: usize, params: &mut ParamVec, visit: &mut F) -> bool
    where
        F: FnMut(&TrieNode, &ParamVec) -> bool,
    {
        if idx == path.len() {
            if self.has_routes() && visit(self, params) {
                return true;
            }
        } else {
            let segment = path.segment(idx);
            if let Some(child) = self.literals.get(segment) {
                if child.walk(path, idx + 1, params, visit) {
                    return true;
                }
            }
            for child in &self.params {
                params.push((Arc::clone(&child.name), segment.to_string()));
                if child.node.walk(path, idx + 1, params, visit) {
                    return true;
                }
                params.pop();
            }
        }

        for child in &self.globs {
            params.push((Arc::clone(&child.name), path.remainder(idx)));
            if child.node.has_routes() && visit(&child.node, params) {
                return true;
            }
            params.pop();
        }
        false
    }
}

/// The compiled routing structure owned by [`super::Router`]
#[derive(Default)]
pub(crate) struct RouteTrie {
    root: TrieNode,
}

impl RouteTrie {
    /// Fail when `pattern` would bind a different name at a position where an
    /// overlapping method already binds one.
    ///
    /// Runs before [`RouteTrie::insert`] so a rejected route leaves no trace.
    pub(crate) fn check(&self, method: &RouteMethod, pattern: &Pattern) -> Result<(), RouterError> {
        let mut node = &self.root;
        for segment in pattern.segments() {
            let (kind, name) = match segment {
                Segment::Literal(text) => match node.literals.get(text) {
                    Some(child) => {
                        node = child;
                        continue;
                    }
                    None => return Ok(()),
                },
                Segment::Param { name, .. } => (EdgeKind::Param, name),
                Segment::Glob(name) => (EdgeKind::Glob, name),
            };

            let edges = node.edges(kind);
            if let Some(existing) = edges
                .iter()
                .find(|c| c.name != *name && c.methods.iter().any(|m| m.overlaps(method)))
            {
                return Err(RouterError::AmbiguousRoute {
                    method: method.to_string(),
                    pattern: pattern.to_string(),
                    name: name.to_string(),
                    existing: existing.name.to_string(),
                });
            }
            match edges.iter().find(|c| c.name == *name) {
                Some(child) => node = &child.node,
                None => return Ok(()),
            }
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, route: Arc<Route>) {
        let mut node = &mut self.root;
        for segment in route.pattern().segments() {
            node = match segment {
                Segment::Literal(text) => node.literals.entry(text.clone()).or_default(),
                Segment::Param { name, .. } => node.named_child(EdgeKind::Param, name, route.method()),
                Segment::Glob(name) => node.named_child(EdgeKind::Glob, name, route.method()),
            };
        }
        node.push_route(route);
    }

    /// Find the route serving `method` at `path`.
    ///
    /// On success the captures are in `params`. On failure `allowed` holds the
    /// methods of every structurally matching terminal node.
    pub(crate) fn lookup(
        &self,
        method: &Method,
        path: &RequestPath<'_>,
        params: &mut ParamVec,
        allowed: &mut Vec<Method>,
    ) -> Option<Arc<Route>> {
        let mut found = None;
        self.root.walk(path, 0, params, &mut |node, captured| {
            if let Some(route) = node.select(method, captured) {
                found = Some(Arc::clone(route));
                return true;
            }
            node.collect_methods(captured, allowed);
            false
        });
        found
    }

    /// Exact methods registered on every terminal node matching `path`
    pub(crate) fn methods_at(&self, path: &RequestPath<'_>) -> Vec<Method> {
        let mut methods = Vec::new();
        let mut params = ParamVec::new();
        self.root.walk(path, 0, &mut params, &mut |node, captured| {
            node.collect_methods(captured, &mut methods);
            false
        });
        methods
    }
}
