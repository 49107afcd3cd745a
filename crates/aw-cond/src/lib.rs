//! The conditional expression tree used to render `if:` values on jobs and
//! steps (spec.md §4.11).
//!
//! Design Notes §9 is explicit: "a small algebraic data type with explicit
//! render... Do not synthesize `if:` strings by concatenation." Every job
//! and step condition in `aw-jobgraph` is built as an [`Expr`] and rendered
//! exactly once, at emission time.

use std::fmt::Write as _;

/// A node in the conditional expression tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// A single-quoted string literal, e.g. `'skipped'`.
    Literal(String),
    /// A dotted property access, e.g. `steps.check_skip_if_match.outputs.skip_check_ok`.
    Property(String),
    /// A zero-argument function call, e.g. `always()`, `cancelled()`.
    Call(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    NotEq(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn literal(s: impl Into<String>) -> Self {
        Expr::Literal(s.into())
    }

    pub fn prop(s: impl Into<String>) -> Self {
        Expr::Property(s.into())
    }

    pub fn call(s: impl Into<String>) -> Self {
        Expr::Call(s.into())
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    pub fn and(self, other: Expr) -> Self {
        Expr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expr) -> Self {
        Expr::Or(Box::new(self), Box::new(other))
    }

    pub fn eq(self, other: Expr) -> Self {
        Expr::Eq(Box::new(self), Box::new(other))
    }

    pub fn not_eq(self, other: Expr) -> Self {
        Expr::NotEq(Box::new(self), Box::new(other))
    }

    /// Fold a list of expressions with `&&`, left to right. Returns `None`
    /// for an empty list (the caller decides what "always true" means).
    pub fn all(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        let mut iter = exprs.into_iter();
        let first = iter.next()?;
        Some(iter.fold(first, |acc, e| acc.and(e)))
    }

    pub fn any(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        let mut iter = exprs.into_iter();
        let first = iter.next()?;
        Some(iter.fold(first, |acc, e| acc.or(e)))
    }

    /// Render this expression to the CI runner's native `${{ ... }}`
    /// condition body (without the wrapping `${{ }}` delimiters — the YAML
    /// emitter adds those only where the surrounding YAML scalar requires
    /// quoting).
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, Prec::Or);
        out
    }

    fn render_into(&self, out: &mut String, ctx: Prec) {
        match self {
            Expr::Literal(s) => {
                let _ = write!(out, "'{}'", escape_single_quotes(s));
            }
            Expr::Property(p) => {
                out.push_str(p);
            }
            Expr::Call(name) => {
                let _ = write!(out, "{name}()");
            }
            Expr::Not(inner) => {
                out.push('!');
                inner.render_into(out, Prec::Not);
            }
            Expr::And(l, r) => {
                let needs_parens = ctx == Prec::Not;
                if needs_parens {
                    out.push('(');
                }
                l.render_into(out, Prec::And);
                out.push_str(" && ");
                r.render_into(out, Prec::And);
                if needs_parens {
                    out.push(')');
                }
            }
            Expr::Or(l, r) => {
                let needs_parens = ctx == Prec::Not || ctx == Prec::And;
                if needs_parens {
                    out.push('(');
                }
                l.render_into(out, Prec::Or);
                out.push_str(" || ");
                r.render_into(out, Prec::Or);
                if needs_parens {
                    out.push(')');
                }
            }
            Expr::Eq(l, r) => {
                l.render_into(out, Prec::Equality);
                out.push_str(" == ");
                r.render_into(out, Prec::Equality);
            }
            Expr::NotEq(l, r) => {
                l.render_into(out, Prec::Equality);
                out.push_str(" != ");
                r.render_into(out, Prec::Equality);
            }
        }
    }
}

/// Precedence context used only to decide where parentheses are required
/// when rendering. Associativity is left-to-right; precedence is
/// `not > and > or` as spec.md §4.11 states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    Or,
    And,
    Not,
    Equality,
}

fn escape_single_quotes(s: &str) -> String {
    s.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_always() {
        assert_eq!(Expr::call("always").render(), "always()");
    }

    #[test]
    fn renders_equality_with_quoted_literal() {
        let e = Expr::prop("steps.detect.outputs.result").eq(Expr::literal("success"));
        assert_eq!(
            e.render(),
            "steps.detect.outputs.result == 'success'"
        );
    }

    #[test]
    fn renders_not_property() {
        let e = Expr::prop("cancelled").not();
        assert_eq!(e.render(), "!cancelled");
    }

    #[test]
    fn and_inside_not_gets_parens() {
        let e = Expr::prop("a").and(Expr::prop("b")).not();
        assert_eq!(e.render(), "!(a && b)");
    }

    #[test]
    fn or_inside_and_gets_parens() {
        let e = Expr::prop("a").and(Expr::prop("b").or(Expr::prop("c")));
        assert_eq!(e.render(), "a && (b || c)");
    }

    #[test]
    fn all_folds_with_and() {
        let e = Expr::all([Expr::call("always"), Expr::prop("a"), Expr::prop("b")]).unwrap();
        assert_eq!(e.render(), "always() && a && b");
    }

    #[test]
    fn any_folds_with_or() {
        let e = Expr::any([Expr::prop("a"), Expr::prop("b")]).unwrap();
        assert_eq!(e.render(), "a || b");
    }

    #[test]
    fn literal_escapes_quotes() {
        let e = Expr::literal("it's");
        assert_eq!(e.render(), "'it''s'");
    }
}
