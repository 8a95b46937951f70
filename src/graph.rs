use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::prefixes::PrefixTable;
use crate::terms::Term;
use crate::triples::Triple;
use crate::ExtractError;

/// In-memory triple store indexed subject -> predicate -> objects, with an
/// optional inverse index of the same shape for reverse lookups.
///
/// A triple is present in the forward index exactly when its reverse is
/// present in the inverse index; `add` and `remove` maintain both together.
/// One graph instance is owned by one worker at a time, queries that a
/// caller may interleave with mutation return owned collections.
pub struct Graph {
    index: HashMap<Term, HashMap<Term, HashSet<Term>>>,
    inverse: Option<Box<Graph>>,
}

impl Default for Graph {
    fn default() -> Self {
        Graph::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            index: HashMap::new(),
            inverse: Some(Box::new(Graph::without_inverse())),
        }
    }

    pub fn without_inverse() -> Self {
        Graph {
            index: HashMap::new(),
            inverse: None,
        }
    }

    pub fn has_inverse(&self) -> bool {
        self.inverse.is_some()
    }

    pub fn inverse(&self) -> Option<&Graph> {
        self.inverse.as_deref()
    }

    pub fn add(&mut self, triple: Triple) {
        if let Some(inv) = &mut self.inverse {
            inv.add(triple.reversed());
        }
        let Triple {
            subject,
            predicate,
            object,
        } = triple;
        self.index
            .entry(subject)
            .or_default()
            .entry(predicate)
            .or_default()
            .insert(object);
    }

    /// Removing an absent triple is a no-op. Emptied predicate and subject
    /// entries are dropped so that `len` keeps its meaning.
    pub fn remove(&mut self, triple: &Triple) {
        if let Some(inv) = &mut self.inverse {
            inv.remove(&triple.reversed());
        }
        let Some(predicates) = self.index.get_mut(&triple.subject) else {
            return;
        };
        let Some(objects) = predicates.get_mut(&triple.predicate) else {
            return;
        };
        objects.remove(&triple.object);
        if objects.is_empty() {
            predicates.remove(&triple.predicate);
            if predicates.is_empty() {
                self.index.remove(&triple.subject);
            }
        }
    }

    pub fn contains(&self, triple: &Triple) -> bool {
        self.index
            .get(&triple.subject)
            .and_then(|predicates| predicates.get(&triple.predicate))
            .map_or(false, |objects| objects.contains(&triple.object))
    }

    /// Number of distinct subjects.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Triple> + '_ {
        self.index.iter().flat_map(|(subject, predicates)| {
            predicates.iter().flat_map(move |(predicate, objects)| {
                objects.iter().map(move |object| {
                    Triple::new(subject.clone(), predicate.clone(), object.clone())
                })
            })
        })
    }

    pub fn predicates(&self) -> HashSet<Term> {
        let mut result = HashSet::new();
        for predicates in self.index.values() {
            for predicate in predicates.keys() {
                result.insert(predicate.clone());
            }
        }
        result
    }

    /// Objects of matching triples; either filter may be omitted.
    pub fn objects(&self, subject: Option<&Term>, predicate: Option<&Term>) -> Vec<Term> {
        let mut result = Vec::new();
        match subject {
            Some(s) => {
                if let Some(predicates) = self.index.get(s) {
                    collect_objects(predicates, predicate, &mut result);
                }
            }
            None => {
                for predicates in self.index.values() {
                    collect_objects(predicates, predicate, &mut result);
                }
            }
        }
        result
    }

    /// Subjects of matching triples, answered through the inverse index.
    pub fn subjects(
        &self,
        predicate: Option<&Term>,
        object: Option<&Term>,
    ) -> Result<Vec<Term>, ExtractError> {
        let inverse = self.inverse.as_ref().ok_or(ExtractError::NoInverseIndex)?;
        Ok(inverse.objects(object, predicate))
    }

    /// All triples whose predicate is any of the given ones.
    pub fn triples_with_predicate(&self, predicates: &[&Term]) -> Vec<Triple> {
        let mut result = Vec::new();
        for (subject, predicate_map) in &self.index {
            for predicate in predicates {
                if let Some(objects) = predicate_map.get(*predicate) {
                    for object in objects {
                        result.push(Triple::new(
                            subject.clone(),
                            (*predicate).clone(),
                            object.clone(),
                        ));
                    }
                }
            }
        }
        result
    }

    /// Elements of an RDF list, in order, following `rdf:rest` links until
    /// `rdf:nil` or a missing link. A visited set guards against cyclic
    /// rest chains in dirty data.
    pub fn get_list(&self, start: &Term) -> Vec<Term> {
        let first = Term::iri("rdf:first");
        let rest = Term::iri("rdf:rest");
        let nil = Term::iri("rdf:nil");
        let mut result = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = Some(start.clone());
        while let Some(node) = cursor {
            if node == nil || !seen.insert(node.clone()) {
                break;
            }
            let Some(predicates) = self.index.get(&node) else {
                break;
            };
            if let Some(objects) = predicates.get(&first) {
                result.extend(objects.iter().cloned());
            }
            cursor = predicates
                .get(&rest)
                .and_then(|links| links.iter().next().cloned());
        }
        result
    }

    pub fn some_subject(&self) -> Option<&Term> {
        self.index.keys().next()
    }

    fn is_list_node(term: &Term) -> bool {
        term.as_iri()
            .map_or(false, |iri| iri.text.starts_with("_:list_"))
    }

    /// Turtle-like serialization grouped by subject, predicates separated
    /// by `;`, objects by `,`, list nodes expanded inline as `(...)`.
    pub fn print_to_writer<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for (subject, predicates) in &self.index {
            if Self::is_list_node(subject) {
                continue;
            }
            write!(out, "\n{} ", subject)?;
            let mut previous_predicate = false;
            for (predicate, objects) in predicates {
                if previous_predicate {
                    write!(out, " ;\n\t")?;
                }
                previous_predicate = true;
                write!(out, "{} ", predicate)?;
                let mut previous_object = false;
                for object in objects {
                    if previous_object {
                        write!(out, ", ")?;
                    }
                    if Self::is_list_node(object) {
                        let items: Vec<String> = self
                            .get_list(object)
                            .iter()
                            .map(|t| t.to_string())
                            .collect();
                        write!(out, "({})", items.join(" "))?;
                    } else {
                        write!(out, "{}", object)?;
                    }
                    previous_object = true;
                }
            }
            write!(out, " .\n")?;
        }
        Ok(())
    }

    pub fn print_to_file(&self, path: &Path, prefixes: &PrefixTable) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        for (prefix, uri) in prefixes.iter() {
            writeln!(out, "@prefix {}: <{}> .", prefix, uri)?;
        }
        self.print_to_writer(&mut out)?;
        out.flush()
    }
}

fn collect_objects(
    predicates: &HashMap<Term, HashSet<Term>>,
    filter: Option<&Term>,
    result: &mut Vec<Term>,
) {
    match filter {
        Some(p) => {
            if let Some(objects) = predicates.get(p) {
                result.extend(objects.iter().cloned());
            }
        }
        None => {
            for objects in predicates.values() {
                result.extend(objects.iter().cloned());
            }
        }
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(b"# RDF Graph\n");
        self.print_to_writer(&mut buffer).map_err(|_| fmt::Error)?;
        f.write_str(&String::from_utf8_lossy(&buffer))
    }
}
