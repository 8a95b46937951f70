use std::fmt;

/// Namespace classification of an IRI, computed once when the term is
/// parsed so that downstream filters never re-probe string prefixes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Namespace {
    /// `wd:` Wikidata entities
    Entity,
    /// `wdt:` / `wdtn:` direct claim properties
    DirectProperty,
    /// `s:` reified statement nodes
    Statement,
    /// `data:` Special:EntityData metadata subjects
    EntityData,
    Rdf,
    Rdfs,
    Schema,
    Skos,
    Xsd,
    Owl,
    Wikibase,
    /// No known namespace matched; the term keeps its full URI form
    Other,
}

/// A prefix-compacted IRI, e.g. `wd:Q42` or `rdfs:label`.
///
/// `text` is the compacted form, or the original `<...>`-bracketed URI when
/// no namespace matched. `ns` is derived from `text` and is deliberately
/// excluded from equality and hashing.
#[derive(Clone, Debug)]
pub struct Iri {
    pub text: String,
    pub ns: Namespace,
}

impl Iri {
    /// Build an IRI from an already-compacted `prefix:local` form.
    pub fn prefixed(text: &str) -> Self {
        let ns = match text.split_once(':') {
            Some((prefix, _)) => namespace_of(prefix),
            None => Namespace::Other,
        };
        Iri {
            text: text.to_string(),
            ns,
        }
    }

    /// The part after the prefix colon, or the whole text for full URIs.
    pub fn local_name(&self) -> &str {
        match self.text.split_once(':') {
            Some((_, local)) => local,
            None => &self.text,
        }
    }
}

impl PartialEq for Iri {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for Iri {}

impl std::hash::Hash for Iri {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

impl fmt::Display for Iri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn namespace_of(prefix: &str) -> Namespace {
    match prefix {
        "wd" => Namespace::Entity,
        "wdt" | "wdtn" => Namespace::DirectProperty,
        "s" => Namespace::Statement,
        "data" => Namespace::EntityData,
        "rdf" => Namespace::Rdf,
        "rdfs" => Namespace::Rdfs,
        "schema" => Namespace::Schema,
        "skos" => Namespace::Skos,
        "xsd" => Namespace::Xsd,
        "owl" => Namespace::Owl,
        "wikibase" => Namespace::Wikibase,
        _ => Namespace::Other,
    }
}

/// Fixed, immutable prefix table consulted by the lexer for IRI compaction
/// and by the graph serializer for `@prefix` headers and expansion.
///
/// Built once per process and shared; there is no ambient global table.
pub struct PrefixTable {
    /// Insertion order, used for header output
    entries: Vec<(String, String)>,
    /// Indices into `entries`, longest URI first, used for compaction
    by_uri_len: Vec<usize>,
}

impl PrefixTable {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let entries: Vec<(String, String)> = pairs
            .iter()
            .map(|(p, u)| (p.to_string(), u.to_string()))
            .collect();
        let mut by_uri_len: Vec<usize> = (0..entries.len()).collect();
        by_uri_len.sort_by_key(|&i| std::cmp::Reverse(entries[i].1.len()));
        PrefixTable {
            entries,
            by_uri_len,
        }
    }

    /// The namespaces emitted by Wikidata truthy dumps.
    pub fn wikidata() -> Self {
        Self::new(&[
            ("wd", "http://www.wikidata.org/entity/"),
            ("wdt", "http://www.wikidata.org/prop/direct/"),
            ("wdtn", "http://www.wikidata.org/prop/direct-normalized/"),
            ("s", "http://www.wikidata.org/entity/statement/"),
            ("data", "https://www.wikidata.org/wiki/Special:EntityData/"),
            ("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
            ("rdfs", "http://www.w3.org/2000/01/rdf-schema#"),
            ("xsd", "http://www.w3.org/2001/XMLSchema#"),
            ("owl", "http://www.w3.org/2002/07/owl#"),
            ("skos", "http://www.w3.org/2004/02/skos/core#"),
            ("schema", "http://schema.org/"),
            ("wikibase", "http://wikiba.se/ontology#"),
        ])
    }

    /// Compact a full URI (without angle brackets) to `prefix:local` form.
    /// Unknown namespaces keep the bracketed URI so that nothing is lost.
    /// Longest namespace wins, so statement nodes compact to `s:` even
    /// though the entity namespace is a prefix of theirs.
    pub fn compact(&self, uri: &str) -> Iri {
        for &i in &self.by_uri_len {
            let (prefix, ns_uri) = &self.entries[i];
            if let Some(local) = uri.strip_prefix(ns_uri.as_str()) {
                return Iri {
                    text: format!("{}:{}", prefix, local),
                    ns: namespace_of(prefix),
                };
            }
        }
        Iri {
            text: format!("<{}>", uri),
            ns: Namespace::Other,
        }
    }

    /// Expand a compacted IRI back to its bracketed URI form.
    /// Already-bracketed and unknown-prefix terms are returned unchanged.
    pub fn expand(&self, text: &str) -> String {
        if text.starts_with('<') {
            return text.to_string();
        }
        if let Some((prefix, local)) = text.split_once(':') {
            for (p, uri) in &self.entries {
                if p == prefix {
                    return format!("<{}{}>", uri, local);
                }
            }
        }
        text.to_string()
    }

    /// Prefix declarations in insertion order, for file headers.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(p, u)| (p.as_str(), u.as_str()))
    }
}
