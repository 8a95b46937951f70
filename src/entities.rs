use std::collections::HashSet;
use std::io::{self, Read};
use std::sync::Arc;

use crate::graph::Graph;
use crate::prefixes::{Namespace, PrefixTable};
use crate::terms::{Term, TermReader};
use crate::triples::{Triple, TripleReader};

/// Literal properties kept only in their English version.
const ENGLISH_ONLY_PREDICATES: [&str; 5] = [
    "rdfs:label",
    "schema:name",
    "skos:prefLabel",
    "schema:description",
    "skos:altLabel",
];

/// Decides whether a triple belongs to a Wikidata entity and returns that
/// entity's subject term if so.
///
/// Rejected: label-like literals that are not `@en`, objects pointing at
/// reified statement nodes, and subjects outside the `wd:Q` item space.
pub fn wikidata_subject(triple: &Triple) -> Option<&Term> {
    if let Some(predicate) = triple.predicate.as_iri() {
        if ENGLISH_ONLY_PREDICATES.contains(&predicate.text.as_str()) {
            match triple.object.as_literal() {
                Some(literal) if literal.language.as_deref() == Some("en") => {}
                _ => return None,
            }
        }
    }
    if let Some(object) = triple.object.as_iri() {
        if object.ns == Namespace::Statement {
            return None;
        }
    }
    match triple.subject.as_iri() {
        Some(subject)
            if subject.ns == Namespace::Entity && subject.local_name().starts_with('Q') =>
        {
            Some(&triple.subject)
        }
        _ => None,
    }
}

/// Groups a triple stream into one graph per Wikidata entity, in the order
/// subjects first appear. Each graph carries an inverse index so that
/// visitors can query subjects as well as objects.
pub struct EntityReader<R: Read> {
    triples: TripleReader<R>,
    current: Option<Term>,
    graph: Graph,
    done: bool,
}

impl<R: Read> EntityReader<R> {
    pub fn new(triples: TripleReader<R>) -> Self {
        EntityReader {
            triples,
            current: None,
            graph: Graph::new(),
            done: false,
        }
    }

    /// Full parsing chain over a raw byte stream starting at `position`,
    /// optionally restricted to an allow-list of predicate IRIs.
    pub fn over(
        reader: R,
        position: u64,
        prefixes: Arc<PrefixTable>,
        allow: Option<HashSet<String>>,
    ) -> Self {
        Self::new(TripleReader::with_predicates(
            TermReader::with_position(reader, position, prefixes),
            allow,
        ))
    }

    pub fn byte_pos(&self) -> u64 {
        self.triples.byte_pos()
    }

    pub fn format_warnings(&self) -> u64 {
        self.triples.format_warnings()
    }

    pub fn bad_statements(&self) -> u64 {
        self.triples.bad_statements()
    }

    pub fn take_io_error(&mut self) -> Option<io::Error> {
        self.triples.take_io_error()
    }
}

impl<R: Read> Iterator for EntityReader<R> {
    type Item = Graph;

    fn next(&mut self) -> Option<Graph> {
        if self.done {
            return None;
        }
        while let Some(triple) = self.triples.next() {
            let subject = match wikidata_subject(&triple) {
                Some(s) => s.clone(),
                None => continue,
            };
            if self.current.as_ref() == Some(&subject) {
                self.graph.add(triple);
                continue;
            }
            self.current = Some(subject);
            let finished = std::mem::take(&mut self.graph);
            self.graph.add(triple);
            if !finished.is_empty() {
                return Some(finished);
            }
        }
        self.done = true;
        if self.graph.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.graph))
        }
    }
}
