// distill.rs - Decorator distillation
//
// Finds a decorated/decorator pair, merges the two classes into a combined
// one and rewrites every construction of the decorator to build the combined
// class instead:
//
//     new B(new A(5))   becomes   new AB(5)
//
// Steps:
//   1. pick the pair (PairSelector)
//   2. build the combined class from the decorator, with the decorated
//      fields, the decorated constructors re-homed and the decorated methods
//      inlined at their call sites
//   3. splice the construction and delegation patterns in every class
//   4. rename operands naming the decorator to the combined class

use crate::class::{self, ClassTree, Method, SEQ};
use crate::error::Result;
use crate::hex::Hex;
use crate::instruction::{int_operand, opcode_of, string_operand, Instruction};
use crate::model::CONSTRUCTOR;
use crate::opcode::Opcode;
use crate::representation::Representation;
use crate::tree::Node;
use crate::value::{Kind, Value};
use std::fmt;
use std::ops::Range;
use tracing::{debug, info};

// ==========================================================================
// Pair selection
// ==========================================================================

/// Chooses which two representations form the decorator pair
pub trait PairSelector {
    /// Indices of `(decorated, decorator)`, or `None` when there is no pair
    fn select(&self, representations: &[Representation]) -> Result<Option<(usize, usize)>>;
}

/// Sorts by name and pairs the first two: the first is decorated, the second
/// decorates it
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstTwoByName;

impl PairSelector for FirstTwoByName {
    fn select(&self, representations: &[Representation]) -> Result<Option<(usize, usize)>> {
        if representations.len() < 2 {
            return Ok(None);
        }
        let mut named = Vec::with_capacity(representations.len());
        for (index, repr) in representations.iter().enumerate() {
            named.push((repr.name()?, index));
        }
        named.sort();
        Ok(Some((named[0].1, named[1].1)))
    }
}

// ==========================================================================
// Options and results
// ==========================================================================

/// Which calls in decorator methods a decorated method body replaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallSiteMatch {
    /// Only `INVOKEVIRTUAL decorated.m D` for the inlined `m D`; only
    /// decorated-typed `GETFIELD`s of the edited method are dropped
    #[default]
    Target,
    /// Every `INVOKEVIRTUAL`, and every `GETFIELD` of every decorator method
    /// is dropped
    AnyVirtual,
}

#[derive(Debug, Clone, Default)]
pub struct DistillOptions {
    pub call_sites: CallSiteMatch,
    /// Timestamp for the combined class; the decorator's is kept when unset
    pub timestamp: Option<String>,
}

/// Instruction pattern that was spliced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// `NEW decorator, DUP, NEW decorated, DUP`
    Construction,
    /// `INVOKESPECIAL decorated.<init>D, INVOKESPECIAL decorator.<init>`
    Delegation,
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Construction => write!(f, "construction"),
            Pattern::Delegation => write!(f, "delegation"),
        }
    }
}

/// Something distillation did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A pattern was replaced in `class.method` at `position`
    Spliced {
        class: String,
        method: String,
        pattern: Pattern,
        position: usize,
    },
    /// The body of decorated `inlined` replaced `calls` calls in `method`
    Inlined {
        method: String,
        inlined: String,
        calls: usize,
    },
    /// The combined class was created
    Combined {
        decorated: String,
        decorator: String,
        combined: String,
    },
}

/// Output of one distillation
#[derive(Debug, Clone)]
pub struct Distilled {
    /// Edited inputs in input order, then the combined class
    pub representations: Vec<Representation>,
    pub events: Vec<Event>,
}

// ==========================================================================
// Subsequence matching
// ==========================================================================

/// Non-overlapping spans where `pattern` occurs in `seq`, left to right
///
/// A partial match that breaks is abandoned and the breaking element is
/// tried again as the start of a new match.
pub fn find_spans(seq: &[Node], pattern: &[Node]) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    if pattern.is_empty() {
        return spans;
    }
    let mut matched = 0;
    let mut i = 0;
    while i < seq.len() {
        if seq[i] == pattern[matched] {
            matched += 1;
            i += 1;
            if matched == pattern.len() {
                spans.push(i - matched..i);
                matched = 0;
            }
        } else if matched > 0 {
            matched = 0;
        } else {
            i += 1;
        }
    }
    spans
}

/// Copy of `seq` with every span of `pattern` replaced; unmatched elements,
/// including a trailing partial match, are kept as they are
pub fn replace(seq: &[Node], pattern: &[Node], replacement: &[Node]) -> (Vec<Node>, Vec<Range<usize>>) {
    let spans = find_spans(seq, pattern);
    let mut out = Vec::with_capacity(seq.len());
    let mut cursor = 0;
    for span in &spans {
        out.extend_from_slice(&seq[cursor..span.start]);
        out.extend_from_slice(replacement);
        cursor = span.end;
    }
    out.extend_from_slice(&seq[cursor..]);
    (out, spans)
}

// ==========================================================================
// Distiller
// ==========================================================================

/// Combined class name: decorator package + decorated simple name +
/// decorator simple name (`org/x/A` + `org/x/B` gives `org/x/AB`)
pub fn combined_name(decorated: &str, decorator: &str) -> String {
    let simple = |name: &str| name.rsplit('/').next().unwrap_or(name).to_string();
    match decorator.rfind('/') {
        Some(slash) => format!(
            "{}/{}{}",
            &decorator[..slash],
            simple(decorated),
            simple(decorator)
        ),
        None => format!("{}{}", simple(decorated), simple(decorator)),
    }
}

/// The names involved in one pairing and their operand payloads
struct Names {
    decorated: String,
    decorator: String,
    combined: String,
}

impl Names {
    fn hex(name: &str) -> Hex {
        Value::Str(name.to_string()).encode()
    }
}

/// A pattern and what replaces it
struct Splice {
    pattern: Pattern,
    target: Vec<Node>,
    replacement: Vec<Node>,
}

fn splices(decorated: &ClassTree, names: &Names) -> Vec<Splice> {
    let new = |owner: &str| Instruction::type_insn(Opcode::NEW, owner).to_node();
    let dup = || Instruction::Plain(Opcode::DUP).to_node();
    let init = |owner: &str, descriptor: &str| {
        Instruction::method(Opcode::INVOKESPECIAL, owner, CONSTRUCTOR, descriptor).to_node()
    };

    let mut splices = vec![Splice {
        pattern: Pattern::Construction,
        target: vec![new(&names.decorator), dup(), new(&names.decorated), dup()],
        replacement: vec![new(&names.combined), dup()],
    }];
    let wrapping = format!("(L{};)V", names.decorated);
    for ctor in decorated.methods().filter(Method::is_constructor) {
        let Some(descriptor) = ctor.descriptor() else {
            continue;
        };
        splices.push(Splice {
            pattern: Pattern::Delegation,
            target: vec![
                init(&names.decorated, &descriptor),
                init(&names.decorator, &wrapping),
            ],
            replacement: vec![init(&names.combined, &descriptor)],
        });
    }
    splices
}

/// Runs distillation over a set of representations
#[derive(Debug, Clone, Default)]
pub struct Distiller<S = FirstTwoByName> {
    selector: S,
    options: DistillOptions,
}

impl Distiller<FirstTwoByName> {
    pub fn new(options: DistillOptions) -> Self {
        Distiller {
            selector: FirstTwoByName,
            options,
        }
    }
}

impl<S: PairSelector> Distiller<S> {
    pub fn with_selector(selector: S, options: DistillOptions) -> Self {
        Distiller { selector, options }
    }

    /// Distill `representations`; with no pair the input comes back untouched
    pub fn apply(&self, representations: Vec<Representation>) -> Result<Distilled> {
        let pair = match self.selector.select(&representations)? {
            Some((decorated, decorator)) if decorated != decorator => (decorated, decorator),
            _ => {
                debug!("no decorator pair among {} classes", representations.len());
                return Ok(Distilled {
                    representations,
                    events: Vec::new(),
                });
            }
        };
        let decorated = representations[pair.0].tree()?;
        let decorator = representations[pair.1].tree()?;
        let names = Names {
            decorated: decorated.name().to_string(),
            decorator: decorator.name().to_string(),
            combined: combined_name(decorated.name(), decorator.name()),
        };

        let mut events = vec![Event::Combined {
            decorated: names.decorated.clone(),
            decorator: names.decorator.clone(),
            combined: names.combined.clone(),
        }];
        let mut combined = self.combine(decorated, decorator, &names, &mut events)?;
        let splices = splices(decorated, &names);

        let mut output = Vec::with_capacity(representations.len() + 1);
        for repr in &representations {
            let mut tree = repr.tree()?.clone();
            rewrite(&mut tree, &splices, &names, &mut events)?;
            output.push(Representation::from_tree(tree).with_source(repr.source()));
        }
        rewrite(&mut combined, &splices, &names, &mut events)?;
        output.push(Representation::from_tree(combined).with_source(&names.combined));

        info!(
            "distilled {} + {} into {} ({} events)",
            names.decorated,
            names.decorator,
            names.combined,
            events.len()
        );
        Ok(Distilled {
            representations: output,
            events,
        })
    }

    /// Build the combined class from the unedited pair
    fn combine(
        &self,
        decorated: &ClassTree,
        decorator: &ClassTree,
        names: &Names,
        events: &mut Vec<Event>,
    ) -> Result<ClassTree> {
        let mut combined = decorator.copy_as(&names.combined, self.options.timestamp.as_deref());
        combined.remove_fields();
        combined.remove_methods_where(|m| m.is_constructor());
        for field in decorated.fields() {
            combined.add_field(field.node().clone());
        }

        let from = Names::hex(&names.decorated);
        let to = Names::hex(&names.combined);
        for ctor in decorated.methods().filter(Method::is_constructor) {
            let mut node = ctor.node().clone();
            class::rewrite_method(&mut node, &from, &to);
            combined.add_method(node);
        }

        let mut copies = 0;
        for method in decorated.methods().filter(|m| !m.is_constructor()) {
            self.inline(&mut combined, method, names, &mut copies, events)?;
        }
        Ok(combined)
    }

    /// Replace calls to `inlined` in the combined class's own methods with
    /// its body
    fn inline(
        &self,
        combined: &mut ClassTree,
        inlined: Method<'_>,
        names: &Names,
        copies: &mut usize,
        events: &mut Vec<Event>,
    ) -> Result<()> {
        let any = self.options.call_sites == CallSiteMatch::AnyVirtual;
        let descriptor = inlined.descriptor().unwrap_or_default();
        let call = Instruction::method(Opcode::INVOKEVIRTUAL, &names.decorated, inlined.name(), &descriptor)
            .to_node();
        let is_call = |node: &Node| {
            if any {
                opcode_of(node) == Some(Opcode::INVOKEVIRTUAL)
            } else {
                *node == call
            }
        };
        let wrapped = format!("L{};", names.decorated);
        let drops_field = |node: &Node| {
            opcode_of(node) == Some(Opcode::GETFIELD)
                && (any || string_operand(node, 2).as_deref() == Some(wrapped.as_str()))
        };
        let (from, to) = (Names::hex(&names.decorated), Names::hex(&names.combined));

        for mut candidate in combined.methods_mut() {
            let view = candidate.as_method();
            if view.is_constructor() || view.node().child(SEQ).is_none() {
                continue;
            }
            let body = view.instructions();
            let calls = body.iter().filter(|n| is_call(n)).count();
            if calls == 0 && !any {
                continue;
            }

            let mut edited = Vec::with_capacity(body.len());
            for node in body {
                if drops_field(node) {
                    continue;
                }
                if is_call(node) {
                    *copies += 1;
                    edited.extend(inline_body(inlined.instructions(), *copies, &from, &to));
                } else {
                    edited.push(node.clone());
                }
            }
            let method = candidate.name().to_string();
            candidate.set_instructions(edited)?;
            if calls > 0 {
                info!(
                    "inlined {}.{}{} into {}.{} ({} calls)",
                    names.decorated,
                    inlined.name(),
                    descriptor,
                    names.combined,
                    method,
                    calls
                );
                events.push(Event::Inlined {
                    method,
                    inlined: format!("{}{}", inlined.name(), descriptor),
                    calls,
                });
            }
        }
        Ok(())
    }
}

/// A decorated body ready for splicing: no returns, no `ALOAD 0`, labels
/// unique to this copy, decorated references renamed
fn inline_body(body: &[Node], copy: usize, from: &Hex, to: &Hex) -> Vec<Node> {
    let mut nodes: Vec<Node> = body
        .iter()
        .filter(|n| !opcode_of(n).is_some_and(Opcode::is_return))
        .filter(|n| !(opcode_of(n) == Some(Opcode::ALOAD) && int_operand(n, 0) == Some(0)))
        .map(|n| {
            let mut n = n.clone();
            relabel(&mut n, copy);
            n
        })
        .collect();
    class::rewrite_operands_in(&mut nodes, from, to);
    nodes
}

fn relabel(node: &mut Node, copy: usize) {
    if node.base() == Kind::Label.tag() {
        if let Ok(Value::Label(id)) = node.value() {
            node.set_data(Value::Label(format!("{}-inline{}", id, copy)).encode());
        }
    }
    for child in node.children_mut() {
        relabel(child, copy);
    }
}

/// Splice the patterns into every method, then rename the decorator
fn rewrite(tree: &mut ClassTree, splices: &[Splice], names: &Names, events: &mut Vec<Event>) -> Result<()> {
    let class = tree.name().to_string();
    for mut method in tree.methods_mut() {
        if method.as_method().node().child(SEQ).is_none() {
            continue;
        }
        let mut body = method.as_method().instructions().to_vec();
        let mut changed = false;
        for splice in splices {
            let (next, spans) = replace(&body, &splice.target, &splice.replacement);
            for span in &spans {
                info!(
                    "{}.{}: replaced {} pattern at {}",
                    class,
                    method.name(),
                    splice.pattern,
                    span.start
                );
                events.push(Event::Spliced {
                    class: class.clone(),
                    method: method.name().to_string(),
                    pattern: splice.pattern,
                    position: span.start,
                });
            }
            changed |= !spans.is_empty();
            body = next;
        }
        if changed {
            method.set_instructions(body)?;
        }
    }
    let renamed = tree.rewrite_operands(&Names::hex(&names.decorator), &Names::hex(&names.combined));
    if renamed > 0 {
        debug!("{}: renamed {} operands to {}", class, renamed, names.combined);
    }
    Ok(())
}
