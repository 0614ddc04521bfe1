//! Pipeline rewriting
//!
//! Equivalence-preserving rewrites over a validated pipeline: predicate
//! pushdown, adjacent-stage merging, and redundant-stage elimination.
//! Every rewrite that is not obviously safe is skipped; semantic
//! boundaries (`$group`, `$limit`, `$skip`, `$unwind`, `$lookup`,
//! `$facet`, projections that rewrite matched fields) are never crossed.

use bson::{Bson, Document};

const MAX_PASSES: usize = 8;

/// Rewrite a pipeline. The output evaluates to the same result as the
/// input on every document stream.
pub fn optimize(pipeline: Vec<Document>) -> Vec<Document> {
    let mut stages = pipeline;
    for _ in 0..MAX_PASSES {
        let before = stages.len();
        stages = drop_empty_stages(stages);
        let swapped = push_down_matches(&mut stages);
        stages = merge_adjacent(stages);
        if !swapped && stages.len() == before {
            break;
        }
    }
    stages
}

fn stage_parts(stage: &Document) -> Option<(&str, &Bson)> {
    let mut entries = stage.iter();
    let (op, spec) = entries.next()?;
    if entries.next().is_some() {
        return None;
    }
    Some((op.as_str(), spec))
}

/// Drop provably empty stages: `$match: {}` and empty `$addFields`/`$set`.
fn drop_empty_stages(stages: Vec<Document>) -> Vec<Document> {
    stages
        .into_iter()
        .filter(|stage| match stage_parts(stage) {
            Some(("$match" | "$addFields" | "$set", Bson::Document(spec))) => !spec.is_empty(),
            _ => true,
        })
        .collect()
}

/// Swap `[stage, $match]` pairs forward where the preceding stage cannot
/// change the outcome of the match. Returns whether anything moved.
fn push_down_matches(stages: &mut [Document]) -> bool {
    let mut moved = false;
    for i in (1..stages.len()).rev() {
        let Some(("$match", Bson::Document(filter))) = stage_parts(&stages[i]) else {
            continue;
        };
        let matched_fields = referenced_fields(filter);
        let safe = match stage_parts(&stages[i - 1]) {
            Some(("$sort", _)) => true,
            Some(("$project", Bson::Document(spec))) => {
                projection_passes_through(spec, &matched_fields)
            }
            Some(("$addFields" | "$set", Bson::Document(spec))) => {
                !rewrites_any(spec, &matched_fields)
            }
            _ => false,
        };
        if safe {
            stages.swap(i - 1, i);
            moved = true;
        }
    }
    moved
}

/// Field paths a filter reads, including paths inside `$and`/`$or`.
fn referenced_fields(filter: &Document) -> Vec<String> {
    let mut fields = Vec::new();
    collect_referenced(filter, &mut fields);
    fields
}

fn collect_referenced(filter: &Document, out: &mut Vec<String>) {
    for (key, value) in filter {
        if key == "$and" || key == "$or" {
            if let Bson::Array(clauses) = value {
                for clause in clauses {
                    if let Bson::Document(doc) = clause {
                        collect_referenced(doc, out);
                    }
                }
            }
        } else if !key.starts_with('$') {
            out.push(key.clone());
        }
    }
}

/// Whether one dotted path is the other or an ancestor of it.
fn paths_overlap(a: &str, b: &str) -> bool {
    a == b
        || a.strip_prefix(b).is_some_and(|rest| rest.starts_with('.'))
        || b.strip_prefix(a).is_some_and(|rest| rest.starts_with('.'))
}

/// Whether a `$project` passes every matched field through unchanged:
/// inclusion form must list the field with a plain flag, exclusion form
/// must not touch it, and no matched field may be assigned a computed
/// expression.
fn projection_passes_through(spec: &Document, matched: &[String]) -> bool {
    let mut inclusion = false;
    for (field, value) in spec {
        if field == "_id" {
            continue;
        }
        match value {
            Bson::Boolean(true) | Bson::Int32(1) | Bson::Int64(1) => inclusion = true,
            Bson::Boolean(false) | Bson::Int32(0) | Bson::Int64(0) => {}
            // A computed projection rewrites its field; refuse when it
            // overlaps anything the match reads.
            _ => {
                if matched.iter().any(|m| paths_overlap(m, field)) {
                    return false;
                }
                inclusion = true;
            }
        }
    }
    let id_excluded = matches!(
        spec.get("_id"),
        Some(Bson::Boolean(false) | Bson::Int32(0) | Bson::Int64(0))
    );
    for m in matched {
        if m == "_id" && id_excluded {
            return false;
        }
        if inclusion {
            let listed = spec.iter().any(|(field, value)| {
                matches!(
                    value,
                    Bson::Boolean(true) | Bson::Int32(1) | Bson::Int64(1)
                ) && paths_overlap(field, m)
            });
            if !listed && m != "_id" {
                return false;
            }
        } else {
            let excluded = spec.iter().any(|(field, _)| paths_overlap(field, m));
            if excluded {
                return false;
            }
        }
    }
    true
}

/// Whether an `$addFields` assigns any field the match reads.
fn rewrites_any(spec: &Document, matched: &[String]) -> bool {
    spec.keys()
        .any(|field| matched.iter().any(|m| paths_overlap(field, m)))
}

/// Fuse adjacent `$match` pairs with `$and` and adjacent `$addFields`
/// (or `$set`) pairs field-wise, later assignment winning. `$project`
/// stages never fuse.
fn merge_adjacent(stages: Vec<Document>) -> Vec<Document> {
    let mut out: Vec<Document> = Vec::with_capacity(stages.len());
    for stage in stages {
        let fused = match (out.last(), stage_parts(&stage)) {
            (Some(prev), Some(("$match", Bson::Document(next)))) => {
                match stage_parts(prev) {
                    Some(("$match", Bson::Document(first))) => {
                        Some(fuse_matches(first.clone(), next.clone()))
                    }
                    _ => None,
                }
            }
            (Some(prev), Some((op @ ("$addFields" | "$set"), Bson::Document(next)))) => {
                match stage_parts(prev) {
                    Some((prev_op, Bson::Document(first))) if prev_op == op => {
                        let mut merged = first.clone();
                        for (k, v) in next {
                            merged.insert(k.clone(), v.clone());
                        }
                        let mut doc = Document::new();
                        doc.insert(op, merged);
                        Some(doc)
                    }
                    _ => None,
                }
            }
            _ => None,
        };
        match fused {
            Some(doc) => {
                out.pop();
                out.push(doc);
            }
            None => out.push(stage),
        }
    }
    out
}

fn fuse_matches(first: Document, second: Document) -> Document {
    let mut combined = Document::new();
    combined.insert(
        "$and",
        Bson::Array(vec![Bson::Document(first), Bson::Document(second)]),
    );
    let mut stage = Document::new();
    stage.insert("$match", combined);
    stage
}
