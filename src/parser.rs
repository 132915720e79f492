//! Recursive-descent parser with constant folding built in.
//!
//! Two precedence levels (`addsub` over `muldiv`), left-associative. Each
//! level flattens its operand chain into buckets plus a scalar accumulator
//! instead of building a leaning tree: constants merge into the accumulator
//! at parse time, and a whole level whose operands are all constant
//! collapses to a single immediate. Division has no node of its own; the
//! divisors of one level multiply together under a single `Recip`.

use std::collections::HashMap;

use crate::error::JitError;
use crate::graph::{ExprGraph, Node, NodeId};
use crate::lexer::{Lexer, Token};
use crate::symbols::{NativeFn, SymbolTable};

/// Result of one parse production: the node inserted into the graph, plus
/// the folded value when the whole subtree reduced to a constant (in which
/// case the caller usually discards `node` and folds `constant` onward).
#[derive(Clone, Copy)]
struct Reduced {
    node: NodeId,
    constant: Option<f64>,
}

pub(crate) struct Parser<'a> {
    lex: Lexer<'a>,
    look: Token,
    look_at: usize,
    symbols: &'a SymbolTable,
    graph: &'a mut ExprGraph,
    // One Var node per identifier per compilation, so the code generator
    // materialises each variable once.
    var_cache: HashMap<String, NodeId>,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(
        text: &'a str,
        symbols: &'a SymbolTable,
        graph: &'a mut ExprGraph,
    ) -> Result<Self, JitError> {
        let mut lex = Lexer::new(text);
        let look = lex.next_token()?;
        let look_at = lex.token_start();
        Ok(Self {
            lex,
            look,
            look_at,
            symbols,
            graph,
            var_cache: HashMap::new(),
        })
    }

    /// Parses one expression and returns its root node. Well-formed tokens
    /// after the expression are ignored.
    pub(crate) fn parse(mut self) -> Result<NodeId, JitError> {
        Ok(self.addsub()?.node)
    }

    fn bump(&mut self) -> Result<(), JitError> {
        self.look = self.lex.next_token()?;
        self.look_at = self.lex.token_start();
        Ok(())
    }

    fn constant(&mut self, value: f64) -> Reduced {
        Reduced {
            node: self.graph.push(Node::Imm(value)),
            constant: Some(value),
        }
    }

    /// Left-folds `nodes` under the binary constructor `mk`.
    fn chain(&mut self, nodes: &[NodeId], mk: fn(NodeId, NodeId) -> Node) -> Option<NodeId> {
        let (&first, rest) = nodes.split_first()?;
        let mut acc = first;
        for &n in rest {
            acc = self.graph.push(mk(acc, n));
        }
        Some(acc)
    }

    fn addsub(&mut self) -> Result<Reduced, JitError> {
        let first = self.muldiv()?;
        if !matches!(self.look, Token::Plus | Token::Minus) {
            return Ok(first);
        }

        let mut add_nodes: Vec<NodeId> = Vec::new();
        let mut sub_nodes: Vec<NodeId> = Vec::new();
        let mut acc = 0.0f64;
        match first.constant {
            Some(c) => acc += c,
            None => add_nodes.push(first.node),
        }
        loop {
            let negative = match self.look {
                Token::Plus => false,
                Token::Minus => true,
                _ => break,
            };
            self.bump()?;
            let operand = self.muldiv()?;
            match (operand.constant, negative) {
                (Some(c), false) => acc += c,
                (Some(c), true) => acc -= c,
                (None, false) => add_nodes.push(operand.node),
                (None, true) => sub_nodes.push(operand.node),
            }
        }

        let pos = self.chain(&add_nodes, Node::Add);
        let neg = self.chain(&sub_nodes, Node::Add);
        let combined = match (pos, neg) {
            (Some(p), Some(n)) => Some(self.graph.push(Node::Sub(p, n))),
            (Some(p), None) => Some(p),
            (None, Some(n)) => Some(self.graph.push(Node::Neg(n))),
            (None, None) => None,
        };
        match combined {
            None => Ok(self.constant(acc)),
            Some(mut node) => {
                if acc != 0.0 {
                    let k = self.graph.push(Node::Imm(acc));
                    node = self.graph.push(Node::Add(node, k));
                }
                Ok(Reduced {
                    node,
                    constant: None,
                })
            }
        }
    }

    fn muldiv(&mut self) -> Result<Reduced, JitError> {
        let first = self.term()?;
        if !matches!(self.look, Token::Star | Token::Slash) {
            return Ok(first);
        }

        let mut mul_nodes: Vec<NodeId> = Vec::new();
        let mut div_nodes: Vec<NodeId> = Vec::new();
        let mut acc = 1.0f64;
        match first.constant {
            Some(c) => acc *= c,
            None => mul_nodes.push(first.node),
        }
        loop {
            let divide = match self.look {
                Token::Star => false,
                Token::Slash => true,
                _ => break,
            };
            self.bump()?;
            let operand = self.term()?;
            match (operand.constant, divide) {
                (Some(c), false) => acc *= c,
                (Some(c), true) => acc /= c,
                (None, false) => mul_nodes.push(operand.node),
                (None, true) => div_nodes.push(operand.node),
            }
        }

        let num = self.chain(&mul_nodes, Node::Mul);
        let den = self.chain(&div_nodes, Node::Mul);
        let combined = match (num, den) {
            (Some(n), Some(d)) => {
                let recip = self.graph.push(Node::Recip(d));
                Some(self.graph.push(Node::Mul(n, recip)))
            }
            (Some(n), None) => Some(n),
            (None, Some(d)) => Some(self.graph.push(Node::Recip(d))),
            (None, None) => None,
        };
        match combined {
            None => Ok(self.constant(acc)),
            Some(mut node) => {
                if acc != 1.0 {
                    let k = self.graph.push(Node::Imm(acc));
                    node = self.graph.push(Node::Mul(node, k));
                }
                Ok(Reduced {
                    node,
                    constant: None,
                })
            }
        }
    }

    fn term(&mut self) -> Result<Reduced, JitError> {
        match self.look.clone() {
            Token::Num(v) => {
                self.bump()?;
                Ok(self.constant(v))
            }
            Token::Minus => {
                self.bump()?;
                // '-' directly before a literal is part of the literal
                if let Token::Num(v) = self.look {
                    self.bump()?;
                    return Ok(self.constant(-v));
                }
                // the operand is a term, so -a*b is (-a)*b
                let operand = self.term()?;
                match operand.constant {
                    Some(c) => Ok(self.constant(-c)),
                    None => {
                        let zero = self.graph.push(Node::Imm(0.0));
                        let node = self.graph.push(Node::Sub(zero, operand.node));
                        Ok(Reduced {
                            node,
                            constant: None,
                        })
                    }
                }
            }
            Token::Ident(name) => {
                let name_at = self.look_at;
                self.bump()?;
                if matches!(self.look, Token::LParen) {
                    self.call(name, name_at)
                } else if let Some(addr) = self.symbols.var_addr(&name) {
                    let node = self.var_node(&name, addr);
                    Ok(Reduced {
                        node,
                        constant: None,
                    })
                } else {
                    Err(JitError::UnknownSymbol {
                        offset: name_at,
                        name,
                    })
                }
            }
            Token::LParen => {
                self.bump()?;
                let inner = self.addsub()?;
                if !matches!(self.look, Token::RParen) {
                    return Err(JitError::ExpectedCloseParen {
                        offset: self.look_at,
                    });
                }
                self.bump()?;
                Ok(inner)
            }
            Token::Eof => Err(JitError::UnexpectedEnd {
                offset: self.look_at,
            }),
            other => Err(JitError::UnexpectedChar {
                offset: self.look_at,
                found: token_char(&other),
            }),
        }
    }

    fn call(&mut self, name: String, name_at: usize) -> Result<Reduced, JitError> {
        self.bump()?; // consume '('
        let mut args: Vec<Reduced> = vec![self.term()?];
        while matches!(self.look, Token::Comma) {
            if args.len() == 3 {
                return Err(JitError::TooManyArguments {
                    offset: self.look_at,
                    name,
                });
            }
            self.bump()?;
            args.push(self.term()?);
        }
        if !matches!(self.look, Token::RParen) {
            return Err(JitError::ExpectedCloseParen {
                offset: self.look_at,
            });
        }
        self.bump()?;

        // arity observed at the call site selects the binding
        let func = self
            .symbols
            .fn_of(&name, args.len() as u8)
            .ok_or_else(|| JitError::UnknownSymbol {
                offset: name_at,
                name: name.clone(),
            })?;

        // all arguments constant: run the (pure) function at compile time
        let consts: Option<Vec<f64>> = args.iter().map(|a| a.constant).collect();
        if let Some(c) = consts {
            let value = match (func, c.as_slice()) {
                (NativeFn::Unary(f), [a]) => f(*a),
                (NativeFn::Binary(f), [a, b]) => f(*a, *b),
                (NativeFn::Ternary(f), [a, b, x]) => f(*a, *b, *x),
                _ => unreachable!("binding arity matches the argument count"),
            };
            return Ok(self.constant(value));
        }

        let node = match (func, args.as_slice()) {
            (NativeFn::Unary(f), [a]) => self.graph.push(Node::Call1(f, a.node)),
            (NativeFn::Binary(f), [a, b]) => self.graph.push(Node::Call2(f, a.node, b.node)),
            (NativeFn::Ternary(f), [a, b, x]) => {
                self.graph.push(Node::Call3(f, a.node, b.node, x.node))
            }
            _ => unreachable!("binding arity matches the argument count"),
        };
        Ok(Reduced {
            node,
            constant: None,
        })
    }

    fn var_node(&mut self, name: &str, addr: *const f64) -> NodeId {
        if let Some(&id) = self.var_cache.get(name) {
            return id;
        }
        let id = self.graph.push(Node::Var(addr));
        self.var_cache.insert(name.to_string(), id);
        id
    }
}

fn token_char(t: &Token) -> char {
    match t {
        Token::Plus => '+',
        Token::Star => '*',
        Token::Slash => '/',
        Token::Comma => ',',
        Token::LParen => '(',
        Token::RParen => ')',
        _ => '?',
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(names: &[&str]) -> SymbolTable {
        let mut t = SymbolTable::with_builtins();
        for n in names {
            t.bind_var(n, 1.0);
        }
        t
    }

    fn parse(src: &str, table: &SymbolTable) -> (ExprGraph, NodeId) {
        let mut graph = ExprGraph::new();
        let root = Parser::new(src, table, &mut graph)
            .unwrap()
            .parse()
            .unwrap();
        (graph, root)
    }

    fn parse_err(src: &str, table: &SymbolTable) -> JitError {
        let mut graph = ExprGraph::new();
        Parser::new(src, table, &mut graph)
            .and_then(|p| p.parse())
            .unwrap_err()
    }

    #[test]
    fn constants_fold_to_a_single_imm() {
        let t = SymbolTable::with_builtins();
        let (g, root) = parse("1 + 2*3", &t);
        assert!(matches!(g.node(root), Node::Imm(v) if v == 7.0));
        let (g, root) = parse("8/2*0.5*1e-1", &t);
        assert!(matches!(g.node(root), Node::Imm(v) if v == 0.2));
        let (g, root) = parse("(1 + 2)*3", &t);
        assert!(matches!(g.node(root), Node::Imm(v) if v == 9.0));
    }

    #[test]
    fn division_chain_shares_one_recip() {
        let t = vars(&["a", "b", "c"]);
        let (g, root) = parse("a/b/c", &t);
        let Node::Mul(l, r) = g.node(root) else {
            panic!("expected Mul at the root");
        };
        assert!(matches!(g.node(l), Node::Var(_)));
        let Node::Recip(d) = g.node(r) else {
            panic!("expected Recip of the combined divisor");
        };
        let Node::Mul(db, dc) = g.node(d) else {
            panic!("expected the divisors multiplied together");
        };
        assert!(matches!(g.node(db), Node::Var(_)));
        assert!(matches!(g.node(dc), Node::Var(_)));
    }

    #[test]
    fn unary_minus_applies_to_the_term() {
        // -a*b parses as (-a)*b
        let t = vars(&["a", "b"]);
        let (g, root) = parse("-a*b", &t);
        let Node::Mul(l, r) = g.node(root) else {
            panic!("expected Mul at the root");
        };
        let Node::Sub(z, a) = g.node(l) else {
            panic!("expected (0 - a) on the left");
        };
        assert!(matches!(g.node(z), Node::Imm(v) if v == 0.0));
        assert!(matches!(g.node(a), Node::Var(_)));
        assert!(matches!(g.node(r), Node::Var(_)));
    }

    #[test]
    fn minus_before_a_literal_folds_into_it() {
        let t = SymbolTable::with_builtins();
        let (g, root) = parse("-2 * 3", &t);
        assert!(matches!(g.node(root), Node::Imm(v) if v == -6.0));
    }

    #[test]
    fn variable_nodes_are_cached_per_compilation() {
        let t = vars(&["x"]);
        let (g, root) = parse("x + x", &t);
        let Node::Add(l, r) = g.node(root) else {
            panic!("expected Add at the root");
        };
        assert_eq!(l, r);
    }

    #[test]
    fn identity_accumulators_are_not_appended() {
        let t = vars(&["x"]);
        let (g, root) = parse("x + 0", &t);
        assert!(matches!(g.node(root), Node::Var(_)));
        let (g, root) = parse("x * 1", &t);
        assert!(matches!(g.node(root), Node::Var(_)));
    }

    #[test]
    fn constant_factors_merge_into_one_multiplier() {
        let t = vars(&["x"]);
        let (g, root) = parse("2 * x * 3", &t);
        let Node::Mul(l, k) = g.node(root) else {
            panic!("expected Mul at the root");
        };
        assert!(matches!(g.node(l), Node::Var(_)));
        assert!(matches!(g.node(k), Node::Imm(v) if v == 6.0));
    }

    #[test]
    fn all_negative_level_wraps_in_neg() {
        let t = vars(&["x", "y"]);
        let (g, root) = parse("1 - x - y", &t);
        let Node::Add(l, k) = g.node(root) else {
            panic!("expected the constant appended with Add");
        };
        let Node::Neg(n) = g.node(l) else {
            panic!("expected Neg over the subtracted operands");
        };
        let Node::Add(nx, ny) = g.node(n) else {
            panic!("expected the subtracted operands summed");
        };
        assert!(matches!(g.node(nx), Node::Var(_)));
        assert!(matches!(g.node(ny), Node::Var(_)));
        assert!(matches!(g.node(k), Node::Imm(v) if v == 1.0));
    }

    #[test]
    fn constant_call_arguments_fold_at_parse_time() {
        let t = SymbolTable::with_builtins();
        let (g, root) = parse("sqrt(16)", &t);
        assert!(matches!(g.node(root), Node::Imm(v) if v == 4.0));
        let (g, root) = parse("min(5, 2)", &t);
        assert!(matches!(g.node(root), Node::Imm(v) if v == 2.0));
    }

    #[test]
    fn arity_mismatch_is_an_unknown_symbol() {
        let t = SymbolTable::with_builtins();
        let err = parse_err("min(1)", &t);
        assert!(matches!(err, JitError::UnknownSymbol { name, .. } if name == "min"));
    }

    #[test]
    fn a_fourth_argument_is_rejected() {
        let t = SymbolTable::with_builtins();
        let err = parse_err("min(1,2,3,4)", &t);
        match err {
            JitError::TooManyArguments { offset, name } => {
                assert_eq!(name, "min");
                assert_eq!(offset, 9);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unbound_identifier_reports_its_offset() {
        let t = SymbolTable::with_builtins();
        let err = parse_err("1 + nope", &t);
        match err {
            JitError::UnknownSymbol { offset, name } => {
                assert_eq!(name, "nope");
                assert_eq!(offset, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_close_paren() {
        let t = SymbolTable::with_builtins();
        assert!(matches!(
            parse_err("(1 + 2", &t),
            JitError::ExpectedCloseParen { .. }
        ));
    }

    #[test]
    fn trailing_tokens_are_ignored() {
        let t = SymbolTable::with_builtins();
        let (g, root) = parse("1 + 2 )", &t);
        assert!(matches!(g.node(root), Node::Imm(v) if v == 3.0));
    }
}
