//! Extended ("rich") Newick parser and writer for phylogenetic networks.
//!
//! Supports the standard Newick grammar plus hybrid tags:
//! ```text
//! network  = subtree ';'
//! subtree  = '(' children ')' label | label
//! children = subtree (',' subtree)*
//! label    = name? ('#' tag)? (':' length (':' support (':' gamma)?)?)?
//! ```
//! A hybrid node appears twice in the string under the same `#` tag — once
//! with its subtree (the major edge) and once as a bare reference (the minor
//! edge), e.g. `(A:2.5,((B:1,#H1:0.5::0.1):1,(C:1,(D:0.5)#H1:0.5::0.9):1):0.5);`.
//! The two occurrences fuse into a single node with two parent edges. The
//! `support` slot is parsed and discarded; `gamma` is the edge's inheritance
//! weight (defaulted at finalization when absent).

use std::collections::HashMap;

use reticula_core::{ReticulaError, Result};

use crate::network::{Network, NodeId, GAMMA_UNSET};

/// Parse an extended Newick string into a finalized [`Network`].
pub fn parse(input: &str) -> Result<Network> {
    let mut parser = Parser::new(input.as_bytes());
    let ast = parser.parse_network()?;
    build_network(ast)
}

/// Serialize a finalized [`Network`] to an extended Newick string.
///
/// Hybrid nodes are written in full under their major parent edge and as a
/// `#tag` reference under the minor one.
pub fn write(net: &Network) -> String {
    let mut buf = String::new();
    write_subtree(net, net.root(), &mut buf);
    buf.push(';');
    buf
}

// ── Writer ─────────────────────────────────────────────────────────────────

fn write_subtree(net: &Network, id: NodeId, buf: &mut String) {
    let node = net.node(id).expect("node id from traversal");
    if !node.child_edges.is_empty() {
        buf.push('(');
        for (i, &e) in node.child_edges.iter().enumerate() {
            if i > 0 {
                buf.push(',');
            }
            let edge = net.edge(e).expect("edge id from node");
            let child = net.node(edge.child).expect("edge endpoints valid");
            if child.is_hybrid && !edge.is_major {
                // Minor-edge reference: tag only, no subtree.
                buf.push('#');
                buf.push_str(child.name.as_deref().unwrap_or("H"));
            } else {
                write_subtree(net, edge.child, buf);
                if child.is_hybrid {
                    buf.push('#');
                    buf.push_str(child.name.as_deref().unwrap_or("H"));
                } else if let Some(ref name) = child.name {
                    buf.push_str(name);
                }
            }
            buf.push(':');
            push_float(buf, edge.length);
            if edge.is_hybrid {
                buf.push_str("::");
                push_float(buf, edge.gamma);
            }
        }
        buf.push(')');
    }
    if id == net.root() {
        if let Some(ref name) = node.name {
            buf.push_str(name);
        }
    }
}

/// Format with enough precision but without trailing zeros.
fn push_float(buf: &mut String, value: f64) {
    let s = format!("{:.10}", value);
    let s = s.trim_end_matches('0');
    let s = s.trim_end_matches('.');
    buf.push_str(if s.is_empty() { "0" } else { s });
}

// ── Parser ─────────────────────────────────────────────────────────────────

/// Intermediate parse tree; hybrid occurrences are fused afterwards.
struct ParseNode {
    name: Option<String>,
    hybrid_tag: Option<String>,
    length: Option<f64>,
    gamma: Option<f64>,
    children: Vec<ParseNode>,
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn parse_network(&mut self) -> Result<ParseNode> {
        self.skip_whitespace();
        let root = self.parse_subtree()?;
        self.skip_whitespace();
        if self.peek() != Some(b';') {
            return Err(ReticulaError::Parse(
                "expected ';' at end of Newick string".into(),
            ));
        }
        self.pos += 1;
        Ok(root)
    }

    fn parse_subtree(&mut self) -> Result<ParseNode> {
        self.skip_whitespace();
        let mut node = ParseNode {
            name: None,
            hybrid_tag: None,
            length: None,
            gamma: None,
            children: Vec::new(),
        };

        if self.peek() == Some(b'(') {
            self.pos += 1; // consume '('
            node.children.push(self.parse_subtree()?);
            loop {
                self.skip_whitespace();
                if self.peek() == Some(b',') {
                    self.pos += 1;
                    node.children.push(self.parse_subtree()?);
                } else {
                    break;
                }
            }
            self.skip_whitespace();
            if self.peek() != Some(b')') {
                return Err(ReticulaError::Parse("expected ')' in Newick string".into()));
            }
            self.pos += 1; // consume ')'
        }

        self.parse_label(&mut node)?;
        Ok(node)
    }

    fn parse_label(&mut self, node: &mut ParseNode) -> Result<()> {
        self.skip_whitespace();
        let name = self.parse_name();
        if !name.is_empty() {
            node.name = Some(name);
        }
        if self.peek() == Some(b'#') {
            self.pos += 1;
            let tag = self.parse_name();
            if tag.is_empty() {
                return Err(ReticulaError::Parse("expected hybrid tag after '#'".into()));
            }
            node.hybrid_tag = Some(tag);
        }
        self.skip_whitespace();
        if self.peek() == Some(b':') {
            self.pos += 1;
            node.length = Some(self.parse_float("branch length")?);
            // Optional ":support" and ":gamma".
            if self.peek() == Some(b':') {
                self.pos += 1;
                // Support value, parsed and discarded; may be empty (`::`).
                if self.peek() != Some(b':') {
                    let _ = self.parse_float("support value")?;
                }
                if self.peek() == Some(b':') {
                    self.pos += 1;
                    node.gamma = Some(self.parse_float("inheritance weight")?);
                }
            }
        }
        Ok(())
    }

    fn parse_name(&mut self) -> String {
        let start = self.pos;
        while self.pos < self.input.len() {
            match self.input[self.pos] {
                b':' | b',' | b')' | b'(' | b';' | b'#' => break,
                b' ' | b'\t' | b'\n' | b'\r' => break,
                _ => self.pos += 1,
            }
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn parse_float(&mut self, what: &str) -> Result<f64> {
        self.skip_whitespace();
        let start = self.pos;
        while self.pos < self.input.len() {
            match self.input[self.pos] {
                b'0'..=b'9' | b'.' | b'-' | b'+' | b'e' | b'E' => self.pos += 1,
                _ => break,
            }
        }
        let s = std::str::from_utf8(&self.input[start..self.pos]).unwrap_or("");
        if s.is_empty() {
            return Err(ReticulaError::Parse(format!("expected {} after ':'", what)));
        }
        s.parse()
            .map_err(|_| ReticulaError::Parse(format!("invalid {}: '{}'", what, s)))
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.input.len() {
            match self.input[self.pos] {
                b' ' | b'\t' | b'\n' | b'\r' => self.pos += 1,
                _ => break,
            }
        }
    }
}

// ── AST → Network ──────────────────────────────────────────────────────────

fn build_network(ast: ParseNode) -> Result<Network> {
    let mut net = Network::new();
    if ast.hybrid_tag.is_some() {
        return Err(ReticulaError::Parse("root cannot be a hybrid node".into()));
    }
    let root = net.root();
    if ast.name.is_some() {
        net.set_name(root, ast.name.clone())?;
    }
    let mut hybrids: HashMap<String, NodeId> = HashMap::new();
    for child in ast.children {
        attach(&mut net, root, child, &mut hybrids)?;
    }
    // A hybrid tag must have fused two attachments into two parent edges.
    for (tag, &id) in &hybrids {
        let n_parents = net.node(id).map_or(0, |n| n.parent_edges.len());
        if n_parents != 2 {
            return Err(ReticulaError::Parse(format!(
                "hybrid tag '#{}' appears with {} parent edge(s), expected 2",
                tag, n_parents
            )));
        }
    }
    net.finalize()?;
    Ok(net)
}

fn attach(
    net: &mut Network,
    parent: NodeId,
    ast: ParseNode,
    hybrids: &mut HashMap<String, NodeId>,
) -> Result<()> {
    let id = match &ast.hybrid_tag {
        Some(tag) => match hybrids.get(tag) {
            Some(&existing) => existing,
            None => {
                let id = net.add_node(Some(tag.clone()));
                hybrids.insert(tag.clone(), id);
                id
            }
        },
        None => net.add_node(ast.name.clone()),
    };
    let length = ast.length.unwrap_or(0.0);
    let gamma = ast.gamma.unwrap_or(GAMMA_UNSET);
    net.add_edge(parent, id, length, gamma)?;
    for child in ast.children {
        attach(net, id, child, hybrids)?;
    }
    Ok(())
}
