//! Snippet state machine over the dependency graph.

use std::collections::VecDeque;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use super::types::{
    Identity, Snippet, SnippetEvent, SnippetKey, Status, Transition, entry_point,
};
use crate::analysis::{SnippetKind, VarKind};
use crate::compile::{CompileContext, CompileOutcome, CompileUnit, Compiler, unresolved_is_error};
use crate::compile::Symbol;
use crate::error::{Error, Result};

/// Status of a freshly evaluated snippet.
pub fn initial_status(kind: SnippetKind, outcome: &CompileOutcome) -> Status {
    if outcome.has_errors() {
        Status::Rejected
    } else if outcome.unresolved.is_empty() {
        Status::Valid
    } else if unresolved_is_error(kind) {
        Status::Rejected
    } else if outcome.has_header_unresolved()
        || kind == SnippetKind::Var(VarKind::DeclarationWithInitializer)
    {
        Status::RecoverableNotDefined
    } else {
        Status::RecoverableDefined
    }
}

/// Status of an active snippet recompiled because something it depends on
/// changed. Hard errors do not reject it; a variable that was never
/// initialized stays undefined until its initializer resolves.
fn cascade_status(snippet: &Snippet, outcome: &CompileOutcome) -> Status {
    if outcome.has_errors() {
        Status::RecoverableNotDefined
    } else if outcome.unresolved.is_empty() {
        Status::Valid
    } else if outcome.has_header_unresolved()
        || (snippet.is_var() && snippet.status == Status::RecoverableNotDefined)
    {
        Status::RecoverableNotDefined
    } else {
        Status::RecoverableDefined
    }
}

/// All snippets of a session and the dependencies between them.
///
/// Edges go from the snippet providing a declaration to the snippets that
/// reference it. Only `VALID` and `RECOVERABLE_DEFINED` declarations are
/// visible to compilation, so a snippet that becomes undefined hides its
/// name from everything downstream.
#[derive(Debug, Default)]
pub struct SnippetGraph {
    snippets: Vec<Snippet>,
    deps: DiGraph<SnippetKey, ()>,
    holders: FxHashMap<Identity, SnippetKey>,
}

impl SnippetGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: SnippetKey) -> Option<&Snippet> {
        self.snippets.get(key.0)
    }

    /// Every snippet ever evaluated, in evaluation order.
    pub fn snippets(&self) -> impl Iterator<Item = &Snippet> {
        self.snippets.iter()
    }

    /// Active declarations, in evaluation order.
    pub fn active(&self) -> impl Iterator<Item = &Snippet> {
        self.snippets
            .iter()
            .filter(|s| s.status.is_active() && s.is_persistent())
    }

    pub fn find_by_id(&self, id: &str) -> Option<SnippetKey> {
        self.snippets.iter().find(|s| s.id == id).map(|s| s.key)
    }

    /// Active declarations with the given name, most recent last.
    pub fn find_by_name(&self, name: &str) -> Vec<SnippetKey> {
        self.active()
            .filter(|s| s.name.as_deref() == Some(name))
            .map(|s| s.key)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    /// Declarations visible to a compilation right now.
    pub fn context(&self) -> CompileContext {
        CompileContext::from_declarations(
            self.active()
                .filter(|s| s.status.is_defined())
                .filter_map(|s| s.declaration.as_ref()),
        )
    }

    /// Whether an active variable already uses `name`.
    pub fn var_name_taken(&self, name: &str) -> bool {
        self.active()
            .any(|s| s.is_var() && s.name.as_deref() == Some(name))
    }

    /// A valid declaration with exactly this source, if re-evaluating it
    /// would change nothing. Variables with initializers always re-run.
    pub fn unchanged(&self, kind: SnippetKind, source: &str) -> Option<SnippetKey> {
        if !kind.is_persistent()
            || matches!(
                kind,
                SnippetKind::Var(VarKind::DeclarationWithInitializer | VarKind::TempVarExpression)
            )
        {
            return None;
        }
        self.active()
            .find(|s| s.status == Status::Valid && s.kind == kind && s.source.trim() == source.trim())
            .map(|s| s.key)
    }

    /// Snippets that reference `key` directly.
    pub fn dependents(&self, key: SnippetKey) -> Vec<SnippetKey> {
        let mut found: Vec<_> = self
            .deps
            .neighbors_directed(NodeIndex::new(key.0), Direction::Outgoing)
            .map(|n| self.deps[n])
            .filter(|&k| k != key && self.snippets[k.0].status.is_active())
            .collect();
        found.sort();
        found.dedup();
        found
    }

    /// Record a new snippet and propagate its effect.
    ///
    /// The returned events start with the new snippet, followed by the
    /// declaration it overwrites, if any, and then every dependent whose
    /// status or signature changed, shallow before deep.
    pub fn accept(
        &mut self,
        compiler: &dyn Compiler,
        unit: CompileUnit,
        outcome: CompileOutcome,
    ) -> Transition {
        let status = initial_status(unit.kind, &outcome);
        let key = SnippetKey(self.snippets.len());
        self.deps.add_node(key);
        self.snippets.push(Snippet::new(key, unit));

        let mut tx = Transition::default();
        self.install(key, status, outcome, &mut tx);
        let persistent = self.snippets[key.0].is_persistent();
        tx.events.push(SnippetEvent::new(
            key,
            Status::Nonexistent,
            status,
            persistent && status.is_active(),
            None,
        ));
        debug!(snippet = %self.snippets[key.0].id, %status, "accepted");
        if !status.is_active() || !persistent {
            return tx;
        }

        let mut seeds = Vec::new();
        if let Some(identity) = self.snippets[key.0].identity() {
            if let Some(old) = self.holders.insert(identity, key) {
                let previous = self.snippets[old.0].status;
                let signature_change =
                    self.snippets[old.0].signature() != self.snippets[key.0].signature();
                self.snippets[old.0].status = Status::Overwritten;
                tx.retire.push(self.snippets[old.0].class_name());
                tx.events.push(SnippetEvent::new(
                    old,
                    previous,
                    Status::Overwritten,
                    signature_change,
                    Some(key),
                ));
                seeds.extend(self.dependents(old));
            }
        }
        if status.is_defined() {
            seeds.extend(self.waiting_on(key));
        }
        self.cascade(compiler, key, seeds, &mut tx);
        tx
    }

    /// Drop an active declaration and propagate the removal.
    pub fn drop(&mut self, compiler: &dyn Compiler, key: SnippetKey) -> Result<Transition> {
        let snippet = self
            .get(key)
            .ok_or_else(|| Error::InvalidKey(key.to_string()))?;
        if !snippet.is_persistent() {
            return Err(Error::InvalidOperation(format!(
                "snippet {} is not a declaration",
                snippet.id
            )));
        }
        if !snippet.status.is_active() {
            return Err(Error::InvalidOperation(format!(
                "snippet {} is {}, only active snippets can be dropped",
                snippet.id, snippet.status
            )));
        }

        let previous = snippet.status;
        let mut tx = Transition::default();
        if let Some(identity) = snippet.identity() {
            if self.holders.get(&identity) == Some(&key) {
                self.holders.remove(&identity);
            }
        }
        self.snippets[key.0].status = Status::Dropped;
        self.snippets[key.0].entry = None;
        tx.retire.push(self.snippets[key.0].class_name());
        tx.events
            .push(SnippetEvent::new(key, previous, Status::Dropped, false, None));
        debug!(snippet = %self.snippets[key.0].id, "dropped");

        let seeds = if previous.is_defined() {
            self.dependents(key)
        } else {
            Vec::new()
        };
        self.cascade(compiler, key, seeds, &mut tx);
        Ok(tx)
    }

    /// Active snippets with the name `key` provides among their unresolved
    /// references.
    fn waiting_on(&self, key: SnippetKey) -> Vec<SnippetKey> {
        let Some(symbol) = self.snippets[key.0].provides() else {
            return Vec::new();
        };
        self.active()
            .filter(|s| s.key != key && s.unresolved.contains(&symbol))
            .map(|s| s.key)
            .collect()
    }

    /// Recompile everything downstream of `cause` until no status changes.
    ///
    /// A snippet is recompiled again whenever one of its providers changes
    /// after it was last compiled. Each changed snippet gets one event, from
    /// its status before the cascade to its final one, and events are ordered
    /// so a snippet follows every snippet that triggered its recompilation.
    fn cascade(
        &mut self,
        compiler: &dyn Compiler,
        cause: SnippetKey,
        seeds: Vec<SnippetKey>,
        tx: &mut Transition,
    ) {
        let mut seeds = seeds;
        seeds.retain(|&k| k != cause);
        seeds.sort();
        seeds.dedup();

        let limit = self.snippets.len() + 1;
        let mut triggers = Triggers::default();
        let mut before: FxHashMap<SnippetKey, (Status, Option<String>)> = FxHashMap::default();
        let mut visits: FxHashMap<SnippetKey, usize> = FxHashMap::default();
        let mut last_visit: FxHashMap<SnippetKey, usize> = FxHashMap::default();
        for &seed in &seeds {
            triggers.link(cause, seed);
        }
        let mut queued: FxHashSet<SnippetKey> = seeds.iter().copied().collect();
        let mut queue: VecDeque<SnippetKey> = seeds.into();

        let mut step = 0;
        while let Some(key) = queue.pop_front() {
            queued.remove(&key);
            let snippet = &self.snippets[key.0];
            if !snippet.status.is_active() || !snippet.is_persistent() {
                continue;
            }
            let count = visits.entry(key).or_insert(0);
            *count += 1;
            if *count > limit {
                debug!(snippet = %snippet.id, "cascade did not settle");
                continue;
            }
            let previous = snippet.status;
            let old_signature = snippet.signature();
            before
                .entry(key)
                .or_insert_with(|| (previous, old_signature.clone()));
            let unit = CompileUnit {
                snippet_id: snippet.id.clone(),
                source: snippet.source.clone(),
                kind: snippet.kind,
                name: snippet.name.clone(),
            };

            let outcome = compiler.compile(&unit, &self.context());
            let status = cascade_status(snippet, &outcome);
            self.install(key, status, outcome, tx);
            step += 1;
            last_visit.insert(key, step);

            let signature_change = self.snippets[key.0].signature() != old_signature;
            if previous.is_defined() != status.is_defined() || signature_change {
                let mut next = self.dependents(key);
                if status.is_defined() {
                    next.extend(self.waiting_on(key));
                }
                next.sort();
                next.dedup();
                for dependent in next.into_iter().filter(|&d| d != cause) {
                    triggers.link(key, dependent);
                    if queued.insert(dependent) {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        let depths = triggers.depths();
        let mut changed: Vec<_> = before
            .into_iter()
            .filter_map(|(key, (previous, signature))| {
                let snippet = &self.snippets[key.0];
                let signature_change = snippet.signature() != signature;
                (snippet.status != previous || signature_change)
                    .then_some((key, previous, snippet.status, signature_change))
            })
            .collect();
        // Trigger cycles come from mutually recursive declarations; fall back
        // to the order in which each snippet settled.
        changed.sort_by_key(|&(key, ..)| match &depths {
            Some(depths) => (depths.get(&key).copied().unwrap_or(0), key),
            None => (last_visit.get(&key).copied().unwrap_or(0), key),
        });

        for (key, previous, status, signature_change) in changed {
            let snippet = &self.snippets[key.0];
            debug!(snippet = %snippet.id, %previous, %status, "cascaded");
            tx.events.push(SnippetEvent::new(
                key,
                previous,
                status,
                signature_change,
                Some(cause),
            ));
            if snippet.is_var() && previous == Status::RecoverableNotDefined && status == Status::Valid
            {
                tx.initialize.push(key);
            }
        }
    }

    /// Store a compilation result on a snippet, queue its artifact and
    /// rebuild its incoming edges. Only the latest load or retire of a class
    /// stays queued.
    fn install(
        &mut self,
        key: SnippetKey,
        status: Status,
        outcome: CompileOutcome,
        tx: &mut Transition,
    ) {
        let snippet = &mut self.snippets[key.0];
        let was_active = snippet.status.is_active();
        snippet.status = status;
        snippet.diagnostics = outcome.diagnostics;
        snippet.unresolved = outcome.unresolved.into_iter().map(|u| u.symbol).collect();
        snippet.references = outcome.references;
        if outcome.declaration.is_some() {
            snippet.declaration = outcome.declaration;
        }
        if outcome.value_type.is_some() {
            snippet.value_type = outcome.value_type;
        }
        let class_name = snippet.class_name();
        match outcome.artifact {
            Some(mut artifact) if status != Status::Rejected => {
                artifact.class_name = class_name.clone();
                artifact.snippet_id = snippet.id.clone();
                snippet.entry = entry_point(&artifact);
                tx.retire.retain(|c| *c != class_name);
                tx.load.retain(|a| a.class_name != class_name);
                tx.load.push(artifact);
            }
            _ => {
                snippet.entry = None;
                if was_active {
                    tx.load.retain(|a| a.class_name != class_name);
                    tx.retire.push(class_name);
                }
            }
        }

        let node = NodeIndex::new(key.0);
        self.deps
            .retain_edges(|g, e| g.edge_endpoints(e).is_none_or(|(_, to)| to != node));
        let references = self.snippets[key.0].references.clone();
        for provider in self.providers(&references, key) {
            self.deps.add_edge(NodeIndex::new(provider.0), node, ());
        }
    }

    /// Defined snippets providing any of `symbols`.
    fn providers(&self, symbols: &[Symbol], except: SnippetKey) -> Vec<SnippetKey> {
        self.active()
            .filter(|s| s.key != except && s.status.is_defined())
            .filter(|s| s.provides().is_some_and(|p| symbols.contains(&p)))
            .map(|s| s.key)
            .collect()
    }
}

/// Which snippet caused which to be recompiled during one cascade.
#[derive(Default)]
struct Triggers {
    graph: DiGraph<SnippetKey, ()>,
    nodes: FxHashMap<SnippetKey, NodeIndex>,
}

impl Triggers {
    fn node(&mut self, key: SnippetKey) -> NodeIndex {
        if let Some(&node) = self.nodes.get(&key) {
            return node;
        }
        let node = self.graph.add_node(key);
        self.nodes.insert(key, node);
        node
    }

    fn link(&mut self, from: SnippetKey, to: SnippetKey) {
        let (from, to) = (self.node(from), self.node(to));
        self.graph.update_edge(from, to, ());
    }

    /// Length of the longest trigger chain reaching each snippet, or `None`
    /// if the triggers form a cycle.
    fn depths(&self) -> Option<FxHashMap<SnippetKey, usize>> {
        let order = toposort(&self.graph, None).ok()?;
        let mut depth = vec![0usize; self.graph.node_count()];
        for node in order {
            depth[node.index()] = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .map(|p| depth[p.index()] + 1)
                .max()
                .unwrap_or(0);
        }
        Some(
            self.nodes
                .iter()
                .map(|(&key, node)| (key, depth[node.index()]))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::classify;
    use crate::compile::SketchCompiler;

    struct Session {
        graph: SnippetGraph,
        next: usize,
    }

    impl Session {
        fn new() -> Self {
            Self {
                graph: SnippetGraph::new(),
                next: 0,
            }
        }

        fn eval(&mut self, source: &str) -> (SnippetKey, Transition) {
            let c = classify(source).remove(0);
            self.next += 1;
            let unit = CompileUnit {
                snippet_id: self.next.to_string(),
                source: c.source,
                kind: c.kind,
                name: c.name,
            };
            let outcome = SketchCompiler::new().compile(&unit, &self.graph.context());
            let tx = self.graph.accept(&SketchCompiler::new(), unit, outcome);
            (tx.events[0].snippet, tx)
        }

        fn status(&self, key: SnippetKey) -> Status {
            self.graph.get(key).unwrap().status
        }
    }

    #[test]
    fn test_body_reference_to_dropped_var() {
        let mut s = Session::new();
        let (x, _) = s.eval("int x;");
        let (mu, _) = s.eval("int mu() { return x * 4; }");
        assert_eq!(s.status(mu), Status::Valid);
        assert_eq!(s.graph.dependents(x), vec![mu]);

        let tx = s.graph.drop(&SketchCompiler::new(), x).unwrap();
        assert_eq!(s.status(x), Status::Dropped);
        assert_eq!(s.status(mu), Status::RecoverableDefined);
        assert_eq!(tx.events.len(), 2);
        assert_eq!(tx.events[1].cause, Some(x));
        assert_eq!(s.graph.get(mu).unwrap().unresolved_names(), ["x"]);

        let (x2, tx) = s.eval("int x = 10;");
        assert_eq!(s.status(x2), Status::Valid);
        assert_eq!(s.status(mu), Status::Valid);
        assert!(tx.events.iter().any(|e| e.snippet == mu && e.status == Status::Valid));
    }

    #[test]
    fn test_drop_cascades_in_dependency_order() {
        let mut s = Session::new();
        let (a, _) = s.eval("class A {}");
        let (b, _) = s.eval("class B extends A {}");
        let (c, _) = s.eval("class C extends B {}");
        let (d, _) = s.eval("class D extends C {}");
        let tx = s.graph.drop(&SketchCompiler::new(), a).unwrap();
        let order: Vec<_> = tx.events.iter().map(|e| (e.snippet, e.status)).collect();
        assert_eq!(
            order,
            vec![
                (a, Status::Dropped),
                (b, Status::RecoverableNotDefined),
                (c, Status::RecoverableNotDefined),
                (d, Status::RecoverableNotDefined),
            ]
        );
    }

    #[test]
    fn test_dependent_reached_before_its_supertype_is_revisited() {
        let mut s = Session::new();
        let (a, _) = s.eval("class A {}");
        let (c, _) = s.eval("class C extends B { void f() { A q = null; } }");
        let (b, _) = s.eval("class B extends A {}");
        assert_eq!(s.status(c), Status::Valid);

        let tx = s.graph.drop(&SketchCompiler::new(), a).unwrap();
        let order: Vec<_> = tx
            .events
            .iter()
            .map(|e| (e.snippet, e.previous, e.status))
            .collect();
        assert_eq!(
            order,
            vec![
                (a, Status::Valid, Status::Dropped),
                (b, Status::Valid, Status::RecoverableNotDefined),
                (c, Status::Valid, Status::RecoverableNotDefined),
            ]
        );
        assert!(!tx.load.iter().any(|l| tx.retire.contains(&l.class_name)));
    }

    #[test]
    fn test_redeclaration_overwrites_after_new_event() {
        let mut s = Session::new();
        let (old, _) = s.eval("int x = 1;");
        let (new, tx) = s.eval("int x = 2;");
        assert_eq!(tx.events[0].snippet, new);
        assert_eq!(tx.events[1].snippet, old);
        assert_eq!(tx.events[1].status, Status::Overwritten);
        assert_eq!(tx.events[1].cause, Some(new));
        assert!(!tx.events[1].is_signature_change);
        assert!(tx.retire.contains(&"$S1".to_string()));
    }

    #[test]
    fn test_overloads_do_not_overwrite() {
        let mut s = Session::new();
        let (f1, _) = s.eval("int f(int a) { return a; }");
        let (f2, tx) = s.eval("int f(String a) { return 0; }");
        assert_eq!(tx.events.len(), 1);
        assert_eq!(s.status(f1), Status::Valid);
        assert_eq!(s.status(f2), Status::Valid);
    }

    #[test]
    fn test_unchanged_declaration_detected() {
        let mut s = Session::new();
        let (m, _) = s.eval("int one() { return 1; }");
        assert_eq!(s.graph.unchanged(SnippetKind::Method, "int one() { return 1; }"), Some(m));
        s.eval("int y = 1;");
        assert_eq!(
            s.graph.unchanged(SnippetKind::Var(VarKind::DeclarationWithInitializer), "int y = 1;"),
            None
        );
    }

    #[test]
    fn test_new_var_with_unresolved_initializer_is_not_defined() {
        let mut s = Session::new();
        let (y, _) = s.eval("int y = z + 1;");
        assert_eq!(s.status(y), Status::RecoverableNotDefined);
        let (m, _) = s.eval("int twice() { return y * 2; }");
        assert_eq!(s.status(m), Status::RecoverableDefined);

        let (_, tx) = s.eval("int z = 1;");
        assert_eq!(s.status(y), Status::Valid);
        assert_eq!(s.status(m), Status::Valid);
        assert_eq!(tx.initialize, vec![y]);
    }

    #[test]
    fn test_expression_with_unresolved_name_is_rejected() {
        let mut s = Session::new();
        let (e, tx) = s.eval("nope + 1");
        assert_eq!(s.status(e), Status::Rejected);
        assert!(tx.load.is_empty());
        assert!(s.graph.active().next().is_none());
    }

    #[test]
    fn test_drop_rejects_inactive() {
        let mut s = Session::new();
        let (x, _) = s.eval("int x;");
        s.graph.drop(&SketchCompiler::new(), x).unwrap();
        assert!(matches!(
            s.graph.drop(&SketchCompiler::new(), x),
            Err(Error::InvalidOperation(_))
        ));
        assert!(matches!(
            s.graph.drop(&SketchCompiler::new(), SnippetKey(99)),
            Err(Error::InvalidKey(_))
        ));
    }
}
