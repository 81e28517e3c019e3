//! Path-indexed trees that record where every step and rule of a workflow lives.
//!
//! Two trees share the same shape. The [`StepIndex`] groups node references by stage name
//! and nests sub-workflows under the stage that expanded them. The [`Ledger`] carries a
//! `_meta` record per scope listing the rule ids and node ids that belong to it.

use crate::core::workflow::scope::{Scope, Segment};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Reference to a graph node from the step index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRef {
    #[serde(rename = "_nodeid")]
    pub node_id: String,
}

/// Nested sub-workflow entry. `offset` is the absolute scope of the sub-workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubScope {
    #[serde(rename = "_offset")]
    pub offset: Scope,
    #[serde(flatten)]
    pub index: StepIndex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageEntry {
    Step(StepRef),
    Scope(SubScope),
}

impl StageEntry {
    pub fn node_id(&self) -> Option<&str> {
        match self {
            StageEntry::Step(step) => Some(step.node_id.as_str()),
            StageEntry::Scope(_) => None,
        }
    }
}

/// Step index for one scope: stage name to ordered entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepIndex {
    #[serde(flatten)]
    pub stages: IndexMap<String, Vec<StageEntry>>,
}

impl StepIndex {
    pub fn stage(&self, name: &str) -> Option<&[StageEntry]> {
        self.stages.get(name).map(Vec::as_slice)
    }

    /// Resolve a scope relative to this index. Reads never create missing scopes.
    pub fn resolve(&self, scope: &Scope) -> Option<&StepIndex> {
        let mut current = self;
        let mut segments = scope.segments().iter();
        while let Some(segment) = segments.next() {
            let Segment::Stage(stage) = segment else {
                return None;
            };
            let Some(Segment::Index(index)) = segments.next() else {
                return None;
            };
            match current.stages.get(stage)?.get(*index)? {
                StageEntry::Scope(sub) => current = &sub.index,
                StageEntry::Step(_) => return None,
            }
        }
        Some(current)
    }

    pub fn resolve_mut(&mut self, scope: &Scope) -> Option<&mut StepIndex> {
        let mut current = self;
        let mut segments = scope.segments().iter();
        while let Some(segment) = segments.next() {
            let Segment::Stage(stage) = segment else {
                return None;
            };
            let Some(Segment::Index(index)) = segments.next() else {
                return None;
            };
            match current.stages.get_mut(stage)?.get_mut(*index)? {
                StageEntry::Scope(sub) => current = &mut sub.index,
                StageEntry::Step(_) => return None,
            }
        }
        Some(current)
    }

    pub fn push_step(&mut self, stage: &str, node_id: &str) {
        self.stages
            .entry(stage.to_string())
            .or_default()
            .push(StageEntry::Step(StepRef {
                node_id: node_id.to_string(),
            }));
    }

    /// Drop a step reference from `stage`. Sub-workflow entries are never removed, and a
    /// stage left without entries disappears from the index.
    pub fn remove_step(&mut self, stage: &str, node_id: &str) -> bool {
        let Some(entries) = self.stages.get_mut(stage) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.node_id() != Some(node_id));
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.stages.shift_remove(stage);
        }
        removed
    }

    /// Remove `stage` with every entry under it, sub-workflows included.
    pub fn remove_stage(&mut self, stage: &str) -> Vec<StageEntry> {
        self.stages.shift_remove(stage).unwrap_or_default()
    }

    /// Append an empty sub-workflow under `stage` and return its position in the stage list.
    pub fn open_scope(&mut self, stage: &str, parent: &Scope) -> (usize, Scope) {
        let entries = self.stages.entry(stage.to_string()).or_default();
        let position = entries.len();
        let offset = parent.child(stage, position);
        entries.push(StageEntry::Scope(SubScope {
            offset: offset.clone(),
            index: StepIndex::default(),
        }));
        (position, offset)
    }

    /// Every `(scope, node id)` pair recorded in this tree, with `base` as this index's scope.
    pub fn collect_steps(&self, base: &Scope) -> Vec<(Scope, String)> {
        let mut out = Vec::new();
        self.walk(base, &mut |scope, entry| {
            if let StageEntry::Step(step) = entry {
                out.push((scope.clone(), step.node_id.clone()));
            }
        });
        out
    }

    /// Every sub-scope reachable from this index, as `(position, recorded offset)` pairs.
    pub fn collect_scopes(&self, base: &Scope) -> Vec<(Scope, Scope)> {
        let mut out = Vec::new();
        self.walk(base, &mut |scope, entry| {
            if let StageEntry::Scope(sub) = entry {
                out.push((scope.clone(), sub.offset.clone()));
            }
        });
        out
    }

    // The callback receives the scope the entry's position resolves to for sub-scopes,
    // and the owning scope for steps.
    fn walk(&self, base: &Scope, visit: &mut dyn FnMut(&Scope, &StageEntry)) {
        for (stage, entries) in &self.stages {
            for (position, entry) in entries.iter().enumerate() {
                match entry {
                    StageEntry::Step(_) => visit(base, entry),
                    StageEntry::Scope(sub) => {
                        let here = base.child(stage, position);
                        visit(&here, entry);
                        sub.index.walk(&here, visit);
                    }
                }
            }
        }
    }
}

/// Per-scope record of rule ids and node ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerMeta {
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub steps: Vec<String>,
}

impl LedgerMeta {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.steps.is_empty()
    }
}

/// Bookkeeping tree node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(rename = "_meta", default)]
    pub meta: LedgerMeta,
    #[serde(flatten)]
    pub children: IndexMap<String, Ledger>,
}

impl Ledger {
    pub fn resolve(&self, scope: &Scope) -> Option<&Ledger> {
        let mut current = self;
        for segment in scope.segments() {
            current = current.children.get(&segment.key())?;
        }
        Some(current)
    }

    /// Walk to `scope`, creating missing nodes with an empty `_meta` record.
    pub fn ensure(&mut self, scope: &Scope) -> &mut Ledger {
        let mut current = self;
        for segment in scope.segments() {
            current = current.children.entry(segment.key()).or_default();
        }
        current
    }

    /// Scopes of every ledger node whose path alternates stage and index segments.
    pub fn collect_scopes(&self) -> Vec<Scope> {
        let mut out = vec![Scope::root()];
        self.collect_into(&mut Vec::new(), &mut out);
        out
    }

    fn collect_into(&self, path: &mut Vec<Segment>, out: &mut Vec<Scope>) {
        for (stage, by_index) in &self.children {
            for (key, child) in &by_index.children {
                let Ok(index) = key.parse::<usize>() else {
                    continue;
                };
                path.push(Segment::Stage(stage.clone()));
                path.push(Segment::Index(index));
                out.push(Scope::from_segments(path.clone()));
                child.collect_into(path, out);
                path.pop();
                path.pop();
            }
        }
    }

    /// Every `(scope, node id)` pair recorded in `_meta.steps`, with `base` as this node's scope.
    pub fn collect_steps(&self, base: &Scope) -> Vec<(Scope, String)> {
        let mut out: Vec<(Scope, String)> = self
            .meta
            .steps
            .iter()
            .map(|id| (base.clone(), id.clone()))
            .collect();
        for (stage, by_index) in &self.children {
            // Stage-level nodes should stay empty; anything recorded there gets a scope that
            // matches no step index entry, which validation reports.
            let mut stage_path = base.segments().to_vec();
            stage_path.push(Segment::Stage(stage.clone()));
            let stage_scope = Scope::from_segments(stage_path);
            out.extend(
                by_index
                    .meta
                    .steps
                    .iter()
                    .map(|id| (stage_scope.clone(), id.clone())),
            );
            for (key, child) in &by_index.children {
                let Ok(index) = key.parse::<usize>() else {
                    continue;
                };
                out.extend(child.collect_steps(&base.child(stage, index)));
            }
        }
        out
    }

    /// Drop the bookkeeping of every sub-workflow opened under `stage`.
    pub fn remove_stage(&mut self, stage: &str) -> Option<Ledger> {
        self.children.shift_remove(stage)
    }

    /// Every rule id recorded anywhere under this node.
    pub fn collect_rules(&self) -> Vec<String> {
        let mut out = self.meta.rules.clone();
        for child in self.children.values() {
            out.extend(child.collect_rules());
        }
        out
    }
}
