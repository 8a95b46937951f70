use std::collections::{HashSet, VecDeque};
use std::io::{self, Read};

use tracing::error;

use crate::terms::{Sep, Term, TermReader};

/// One RDF statement. Equality is structural.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Triple {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

impl Triple {
    pub fn new(subject: Term, predicate: Term, object: Term) -> Self {
        Triple {
            subject,
            predicate,
            object,
        }
    }

    /// The statement with subject and object swapped, for inverse indexing.
    pub fn reversed(&self) -> Triple {
        Triple {
            subject: self.object.clone(),
            predicate: self.predicate.clone(),
            object: self.subject.clone(),
        }
    }
}

/// Assembles triples from a term stream, honoring the `;` and `,`
/// statement abbreviations and `[...]` blank node blocks.
///
/// Malformed statements are logged, counted, and skipped up to the next `.`
/// so that a bad line never takes down a whole shard.
pub struct TripleReader<R: Read> {
    terms: TermReader<R>,
    allow: Option<HashSet<String>>,
    pending: VecDeque<Triple>,
    subject: Option<Term>,
    predicate: Option<Term>,
    blank_counter: u64,
    bad_statements: u64,
    done: bool,
}

impl<R: Read> TripleReader<R> {
    pub fn new(terms: TermReader<R>) -> Self {
        Self::with_predicates(terms, None)
    }

    /// `allow` restricts the yielded triples to the given predicate IRIs
    /// (compacted text form). `None` keeps everything.
    pub fn with_predicates(terms: TermReader<R>, allow: Option<HashSet<String>>) -> Self {
        TripleReader {
            terms,
            allow,
            pending: VecDeque::new(),
            subject: None,
            predicate: None,
            blank_counter: 0,
            bad_statements: 0,
            done: false,
        }
    }

    pub fn byte_pos(&self) -> u64 {
        self.terms.byte_pos()
    }

    pub fn format_warnings(&self) -> u64 {
        self.terms.format_warnings()
    }

    /// Statements abandoned because of unexpected separators or truncation.
    pub fn bad_statements(&self) -> u64 {
        self.bad_statements
    }

    pub fn take_io_error(&mut self) -> Option<io::Error> {
        self.terms.take_io_error()
    }

    fn predicate_allowed(&self, predicate: &Term) -> bool {
        match &self.allow {
            None => true,
            Some(set) => predicate
                .as_iri()
                .map_or(false, |iri| set.contains(&iri.text)),
        }
    }

    fn push_if_allowed(&mut self, subject: Term, predicate: Term, object: Term) {
        if self.predicate_allowed(&predicate) {
            self.pending
                .push_back(Triple::new(subject, predicate, object));
        }
    }

    /// Abandon the current statement and scan to the next `.`.
    fn recover(&mut self) {
        self.bad_statements += 1;
        loop {
            match self.terms.next() {
                None => {
                    self.done = true;
                    return;
                }
                Some(Term::Sep(Sep::Dot)) => return,
                Some(_) => {}
            }
        }
    }

    /// Read the predicate after a subject or `;`. Returns false when the
    /// statement had to be abandoned.
    fn read_predicate(&mut self) -> bool {
        match self.terms.next() {
            None => {
                error!(
                    "File ended unexpectedly after {}",
                    self.subject.as_ref().map(|t| t.to_string()).unwrap_or_default()
                );
                self.bad_statements += 1;
                self.done = true;
                false
            }
            Some(Term::Sep(sep)) => {
                error!("Unexpected {} in predicate position", sep.as_char());
                if sep == Sep::Dot {
                    self.bad_statements += 1;
                } else {
                    self.recover();
                }
                false
            }
            Some(term) => {
                self.predicate = Some(term);
                true
            }
        }
    }

    /// Parse a `[...]` block: synthesize a blank node subject and queue the
    /// block's statements. Returns the blank node term.
    fn read_bracket_block(&mut self) -> Term {
        let bnode = Term::iri(&format!("_:b{}", self.blank_counter));
        self.blank_counter += 1;
        let mut predicate: Option<Term> = None;
        loop {
            let term = match self.terms.next() {
                None => {
                    error!("File ended unexpectedly in blank node block");
                    self.bad_statements += 1;
                    break;
                }
                Some(t) => t,
            };
            match term {
                Term::Sep(Sep::CloseBracket) => break,
                Term::Sep(Sep::Semicolon) => continue,
                Term::Sep(Sep::Comma) => {
                    let Some(pred) = predicate.clone() else {
                        error!("Unexpected , at start of blank node block");
                        self.bad_statements += 1;
                        break;
                    };
                    if !self.read_block_object(&bnode, &pred) {
                        break;
                    }
                }
                Term::Sep(sep) => {
                    error!("Unexpected {} in blank node block", sep.as_char());
                    self.bad_statements += 1;
                    break;
                }
                term => {
                    predicate = Some(term.clone());
                    if !self.read_block_object(&bnode, &term) {
                        break;
                    }
                }
            }
        }
        bnode
    }

    fn read_block_object(&mut self, bnode: &Term, predicate: &Term) -> bool {
        match self.terms.next() {
            None => {
                error!("File ended unexpectedly after {} {}", bnode, predicate);
                self.bad_statements += 1;
                false
            }
            Some(Term::Sep(Sep::OpenBracket)) => {
                let inner = self.read_bracket_block();
                self.push_if_allowed(bnode.clone(), predicate.clone(), inner);
                true
            }
            Some(Term::Sep(sep)) => {
                error!(
                    "Unexpected {} after {} {}",
                    sep.as_char(),
                    bnode,
                    predicate
                );
                self.bad_statements += 1;
                false
            }
            Some(term) => {
                self.push_if_allowed(bnode.clone(), predicate.clone(), term);
                true
            }
        }
    }
}

impl<R: Read> Iterator for TripleReader<R> {
    type Item = Triple;

    fn next(&mut self) -> Option<Triple> {
        loop {
            if let Some(t) = self.pending.pop_front() {
                return Some(t);
            }
            if self.done {
                return None;
            }
            let term = match self.terms.next() {
                None => {
                    self.done = true;
                    continue;
                }
                Some(t) => t,
            };
            match term {
                Term::Sep(Sep::Dot) => continue,
                Term::Sep(Sep::CloseBracket) => {
                    self.done = true;
                    continue;
                }
                Term::Sep(Sep::Semicolon) => {
                    // subject carries over, a fresh predicate follows
                    if !self.read_predicate() {
                        continue;
                    }
                }
                Term::Sep(Sep::Comma) => {
                    // subject and predicate both carry over
                    if self.subject.is_none() || self.predicate.is_none() {
                        error!("Unexpected , with no statement in progress");
                        self.recover();
                        continue;
                    }
                }
                Term::Sep(Sep::OpenBracket) => {
                    let bnode = self.read_bracket_block();
                    self.subject = Some(bnode);
                    if !self.read_predicate() {
                        continue;
                    }
                }
                Term::Sep(sep) => {
                    error!("Unexpected {} in subject position", sep.as_char());
                    self.recover();
                    continue;
                }
                term => {
                    self.subject = Some(term);
                    if !self.read_predicate() {
                        continue;
                    }
                }
            }
            // read the object for the established subject and predicate
            let object = match self.terms.next() {
                None => {
                    error!(
                        "File ended unexpectedly after {} {}",
                        self.subject.as_ref().map(|t| t.to_string()).unwrap_or_default(),
                        self.predicate.as_ref().map(|t| t.to_string()).unwrap_or_default()
                    );
                    self.bad_statements += 1;
                    self.done = true;
                    continue;
                }
                Some(Term::Sep(Sep::OpenBracket)) => self.read_bracket_block(),
                Some(Term::Sep(sep)) => {
                    error!(
                        "Unexpected {} after {} {}",
                        sep.as_char(),
                        self.subject.as_ref().map(|t| t.to_string()).unwrap_or_default(),
                        self.predicate.as_ref().map(|t| t.to_string()).unwrap_or_default()
                    );
                    if sep == Sep::Dot {
                        self.bad_statements += 1;
                    } else {
                        self.recover();
                    }
                    continue;
                }
                Some(term) => term,
            };
            let subject = self.subject.clone().expect("subject set above");
            let predicate = self.predicate.clone().expect("predicate set above");
            if self.predicate_allowed(&predicate) {
                return Some(Triple::new(subject, predicate, object));
            }
        }
    }
}
