use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::info;

use crate::driver::EntityVisitor;
use crate::graph::Graph;
use crate::terms::Term;
use crate::tsv::TsvWriter;
use crate::ExtractError;

/// Root of the class hierarchy, wd:Q35120 ("entity")
const ROOT: &str = "wd:Q35120";

/// Subclass edges and class annotations gathered by one shard.
#[derive(Default)]
pub struct TaxonomyShard {
    /// superclass -> direct subclasses
    pub subclasses: HashMap<Term, HashSet<Term>>,
    pub labels: HashMap<Term, Term>,
    pub descriptions: HashMap<Term, Term>,
}

/// Collects the raw taxonomy from entity graphs. Only labelled classes
/// count; an entity without a `wdt:P279` link or without an English label
/// is skipped entirely.
pub struct TaxonomyVisitor {
    subclass_of: Term,
    label: Term,
    description: Term,
    shard: TaxonomyShard,
}

impl TaxonomyVisitor {
    pub fn new() -> Self {
        TaxonomyVisitor {
            subclass_of: Term::iri("wdt:P279"),
            label: Term::iri("rdfs:label"),
            description: Term::iri("schema:description"),
            shard: TaxonomyShard::default(),
        }
    }
}

impl Default for TaxonomyVisitor {
    fn default() -> Self {
        Self::new()
    }
}

/// A label or description literal with its language tag dropped, the way
/// annotations are stored in the taxonomy files.
fn strip_language(term: &Term) -> Term {
    match term {
        Term::Literal(lit) => {
            let mut lit = lit.clone();
            lit.language = None;
            Term::Literal(lit)
        }
        other => other.clone(),
    }
}

impl EntityVisitor for TaxonomyVisitor {
    type Output = TaxonomyShard;

    fn visit(&mut self, graph: &mut Graph) {
        let predicates = graph.predicates();
        if !predicates.contains(&self.subclass_of) {
            return;
        }
        if !predicates.contains(&self.label) {
            return;
        }
        for triple in graph.iter() {
            if triple.predicate == self.label {
                self.shard
                    .labels
                    .insert(triple.subject.clone(), strip_language(&triple.object));
            } else if triple.predicate == self.description {
                self.shard
                    .descriptions
                    .insert(triple.subject.clone(), strip_language(&triple.object));
            } else if triple.predicate == self.subclass_of {
                self.shard
                    .subclasses
                    .entry(triple.object)
                    .or_default()
                    .insert(triple.subject);
            }
        }
    }

    fn finish(self) -> TaxonomyShard {
        self.shard
    }
}

/// Union of all per-shard results.
pub fn merge_shards(shards: Vec<TaxonomyShard>) -> TaxonomyShard {
    let mut merged = TaxonomyShard::default();
    for shard in shards {
        for (superclass, subs) in shard.subclasses {
            merged
                .subclasses
                .entry(superclass)
                .or_default()
                .extend(subs);
        }
        merged.labels.extend(shard.labels);
        merged.descriptions.extend(shard.descriptions);
    }
    merged
}

/// The hierarchy reachable from the root, with cycles removed.
pub struct CleanTaxonomy {
    /// superclass -> subclasses
    pub down: HashMap<Term, HashSet<Term>>,
    /// subclass -> superclasses
    pub up: HashMap<Term, HashSet<Term>>,
    pub loops_removed: u64,
}

/// Depth-first walk from wd:Q35120 over the raw subclass edges.
///
/// Runs on an explicit stack so that arbitrarily deep hierarchies cannot
/// blow the call stack. An edge leading to a class currently on the walk
/// path would close a cycle and is dropped and counted. A class that was
/// already expanded is linked again (multiple inheritance) but its
/// subclasses are not re-walked.
pub fn build_clean_taxonomy(raw: &TaxonomyShard) -> CleanTaxonomy {
    let root = Term::iri(ROOT);
    let mut clean = CleanTaxonomy {
        down: HashMap::new(),
        up: HashMap::new(),
        loops_removed: 0,
    };
    clean.down.entry(root.clone()).or_default();
    clean.up.entry(root.clone()).or_default();

    let children_of = |class: &Term| -> Vec<Term> {
        raw.subclasses
            .get(class)
            .map(|subs| subs.iter().cloned().collect())
            .unwrap_or_default()
    };

    let mut on_path: HashSet<Term> = HashSet::new();
    let mut expanded: HashSet<Term> = HashSet::new();
    let mut stack: Vec<(Term, Vec<Term>, usize)> = Vec::new();

    on_path.insert(root.clone());
    expanded.insert(root.clone());
    stack.push((root.clone(), children_of(&root), 0));

    loop {
        let step = {
            let Some((node, children, next)) = stack.last_mut() else {
                break;
            };
            if *next >= children.len() {
                None
            } else {
                let child = children[*next].clone();
                *next += 1;
                Some((node.clone(), child))
            }
        };
        let Some((parent, child)) = step else {
            let (node, _, _) = stack.pop().expect("frame checked above");
            on_path.remove(&node);
            continue;
        };
        if on_path.contains(&child) {
            clean.loops_removed += 1;
            continue;
        }
        clean
            .down
            .entry(parent.clone())
            .or_default()
            .insert(child.clone());
        clean.up.entry(child.clone()).or_default().insert(parent);
        if expanded.insert(child.clone()) {
            on_path.insert(child.clone());
            stack.push((child.clone(), children_of(&child), 0));
        }
    }
    clean
}

/// Number of subclass links in the clean taxonomy.
pub fn taxonomy_links(clean: &CleanTaxonomy) -> usize {
    clean.up.values().map(|supers| supers.len()).sum()
}

/// Write `wiki_taxonomy.tsv`, `wiki_taxonomy_labels.tsv` and
/// `wiki_taxonomy_descriptions.tsv` into the output directory.
pub fn write_taxonomy_files(
    clean: &CleanTaxonomy,
    raw: &TaxonomyShard,
    output_dir: &Path,
) -> Result<(), ExtractError> {
    let root = Term::iri(ROOT);
    let root_label = Term::literal("entity");
    let root_description = Term::literal("anything that can be considered, discussed, or observed");
    let subclass_of = Term::iri("rdfs:subClassOf");
    let label_pred = Term::iri("rdfs:label");
    let description_pred = Term::iri("schema:description");

    let mut edges = TsvWriter::create(output_dir.join("wiki_taxonomy.tsv"));
    for (class, superclasses) in &clean.up {
        for superclass in superclasses {
            edges.write_fact(class, &subclass_of, superclass)?;
        }
    }
    edges.finish()?;

    let mut labels = TsvWriter::create(output_dir.join("wiki_taxonomy_labels.tsv"));
    for class in clean.up.keys() {
        let label = if *class == root {
            Some(&root_label)
        } else {
            raw.labels.get(class)
        };
        if let Some(label) = label {
            labels.write_fact(class, &label_pred, label)?;
        }
    }
    labels.finish()?;

    let mut descriptions =
        TsvWriter::create(output_dir.join("wiki_taxonomy_descriptions.tsv"));
    for class in clean.up.keys() {
        let description = if *class == root {
            Some(&root_description)
        } else {
            raw.descriptions.get(class)
        };
        if let Some(description) = description {
            descriptions.write_fact(class, &description_pred, description)?;
        }
    }
    descriptions.finish()?;

    info!(
        "taxonomy written: {} classes, {} links, {} loops removed",
        clean.up.len(),
        taxonomy_links(clean),
        clean.loops_removed
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triples::Triple;

    fn class_graph(qid: &str, superclass: &str) -> Graph {
        let mut graph = Graph::new();
        graph.add(Triple::new(
            Term::iri(qid),
            Term::iri("wdt:P279"),
            Term::iri(superclass),
        ));
        graph.add(Triple::new(
            Term::iri(qid),
            Term::iri("rdfs:label"),
            Term::lang_literal(&format!("class {}", qid), "en"),
        ));
        graph
    }

    fn edge(raw: &mut TaxonomyShard, superclass: &str, subclass: &str) {
        raw.subclasses
            .entry(Term::iri(superclass))
            .or_default()
            .insert(Term::iri(subclass));
    }

    #[test]
    fn test_visitor_collects_labelled_classes() {
        let mut visitor = TaxonomyVisitor::new();
        let mut graph = class_graph("wd:Q2", "wd:Q1");
        graph.add(Triple::new(
            Term::iri("wd:Q2"),
            Term::iri("schema:description"),
            Term::lang_literal("a subclass", "en"),
        ));
        visitor.visit(&mut graph);
        let shard = visitor.finish();

        let subs = shard.subclasses.get(&Term::iri("wd:Q1")).unwrap();
        assert!(subs.contains(&Term::iri("wd:Q2")));
        assert_eq!(
            shard.labels.get(&Term::iri("wd:Q2")),
            Some(&Term::literal("class wd:Q2"))
        );
        assert_eq!(
            shard.descriptions.get(&Term::iri("wd:Q2")),
            Some(&Term::literal("a subclass"))
        );
    }

    #[test]
    fn test_visitor_skips_non_classes_and_unlabelled() {
        let mut visitor = TaxonomyVisitor::new();

        // no subclass link
        let mut instance = Graph::new();
        instance.add(Triple::new(
            Term::iri("wd:Q5"),
            Term::iri("wdt:P31"),
            Term::iri("wd:Q1"),
        ));
        instance.add(Triple::new(
            Term::iri("wd:Q5"),
            Term::iri("rdfs:label"),
            Term::lang_literal("human", "en"),
        ));
        visitor.visit(&mut instance);

        // subclass link but no label
        let mut unlabelled = Graph::new();
        unlabelled.add(Triple::new(
            Term::iri("wd:Q6"),
            Term::iri("wdt:P279"),
            Term::iri("wd:Q1"),
        ));
        visitor.visit(&mut unlabelled);

        let shard = visitor.finish();
        assert!(shard.subclasses.is_empty());
        assert!(shard.labels.is_empty());
    }

    #[test]
    fn test_merge_unions_shards() {
        let mut a = TaxonomyShard::default();
        edge(&mut a, "wd:Q1", "wd:Q2");
        a.labels
            .insert(Term::iri("wd:Q2"), Term::literal("two"));
        let mut b = TaxonomyShard::default();
        edge(&mut b, "wd:Q1", "wd:Q3");
        b.labels
            .insert(Term::iri("wd:Q3"), Term::literal("three"));

        let merged = merge_shards(vec![a, b]);
        let subs = merged.subclasses.get(&Term::iri("wd:Q1")).unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(merged.labels.len(), 2);
    }

    #[test]
    fn test_clean_taxonomy_drops_cycles() {
        let mut raw = TaxonomyShard::default();
        edge(&mut raw, ROOT, "wd:Q1");
        edge(&mut raw, "wd:Q1", "wd:Q2");
        edge(&mut raw, "wd:Q2", "wd:Q1");
        edge(&mut raw, "wd:Q2", "wd:Q3");

        let clean = build_clean_taxonomy(&raw);
        assert_eq!(clean.loops_removed, 1);
        assert!(clean.down[&Term::iri("wd:Q1")].contains(&Term::iri("wd:Q2")));
        assert!(clean.down[&Term::iri("wd:Q2")].contains(&Term::iri("wd:Q3")));
        assert!(!clean
            .down
            .get(&Term::iri("wd:Q2"))
            .unwrap()
            .contains(&Term::iri("wd:Q1")));
        assert_eq!(clean.up[&Term::iri("wd:Q3")].len(), 1);
    }

    #[test]
    fn test_clean_taxonomy_drops_self_loop() {
        let mut raw = TaxonomyShard::default();
        edge(&mut raw, ROOT, "wd:Q1");
        edge(&mut raw, "wd:Q1", "wd:Q1");

        let clean = build_clean_taxonomy(&raw);
        assert_eq!(clean.loops_removed, 1);
        assert!(!clean.down[&Term::iri("wd:Q1")].contains(&Term::iri("wd:Q1")));
    }

    #[test]
    fn test_clean_taxonomy_keeps_multiple_inheritance() {
        let mut raw = TaxonomyShard::default();
        edge(&mut raw, ROOT, "wd:Q1");
        edge(&mut raw, ROOT, "wd:Q2");
        edge(&mut raw, "wd:Q1", "wd:Q3");
        edge(&mut raw, "wd:Q2", "wd:Q3");
        edge(&mut raw, "wd:Q3", "wd:Q4");

        let clean = build_clean_taxonomy(&raw);
        assert_eq!(clean.loops_removed, 0);
        assert_eq!(clean.up[&Term::iri("wd:Q3")].len(), 2);
        // Q4 reached exactly once even though Q3 is linked twice
        assert_eq!(clean.up[&Term::iri("wd:Q4")].len(), 1);
    }

    #[test]
    fn test_clean_taxonomy_ignores_unreachable_edges() {
        let mut raw = TaxonomyShard::default();
        edge(&mut raw, ROOT, "wd:Q1");
        edge(&mut raw, "wd:Q90", "wd:Q91");

        let clean = build_clean_taxonomy(&raw);
        assert!(!clean.up.contains_key(&Term::iri("wd:Q91")));
    }

    #[test]
    fn test_clean_taxonomy_survives_deep_chains() {
        let mut raw = TaxonomyShard::default();
        edge(&mut raw, ROOT, "wd:Q0");
        for i in 0..20_000usize {
            edge(&mut raw, &format!("wd:Q{}", i), &format!("wd:Q{}", i + 1));
        }
        let clean = build_clean_taxonomy(&raw);
        assert_eq!(clean.up.len(), 20_002);
    }

    #[test]
    fn test_write_taxonomy_files() {
        let mut raw = TaxonomyShard::default();
        edge(&mut raw, ROOT, "wd:Q1");
        raw.labels.insert(Term::iri("wd:Q1"), Term::literal("one"));
        raw.descriptions
            .insert(Term::iri("wd:Q1"), Term::literal("first class"));

        let clean = build_clean_taxonomy(&raw);
        let dir = tempfile::tempdir().unwrap();
        write_taxonomy_files(&clean, &raw, dir.path()).unwrap();

        let edges = std::fs::read_to_string(dir.path().join("wiki_taxonomy.tsv")).unwrap();
        assert!(edges.contains("wd:Q1\trdfs:subClassOf\twd:Q35120\t."));

        let labels =
            std::fs::read_to_string(dir.path().join("wiki_taxonomy_labels.tsv")).unwrap();
        assert!(labels.contains("wd:Q1\trdfs:label\t\"one\"\t."));
        assert!(labels.contains("wd:Q35120\trdfs:label\t\"entity\"\t."));

        let descriptions =
            std::fs::read_to_string(dir.path().join("wiki_taxonomy_descriptions.tsv"))
                .unwrap();
        assert!(descriptions.contains("wd:Q1\tschema:description\t\"first class\"\t."));
    }
}
