//! Port datatypes
//!
//! Types are small terms: base names, generics (`<a>`), lists (`[T]`),
//! dicts (`{T}`), records (`(a: T, b: U)`), tuples (`(T, U)`), functions
//! (`T -> U`), the unit type `()` and the wildcard `*`.
//!
//! Unification works on a [`TypeMapping`] that binds generic keys to shared
//! type variables. A port's declared type is identified once per node so
//! that generics with the same name share an id across that node's ports.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A type term.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeTerm {
    /// Matches every other type
    Any,
    /// Named base type such as `sytable` or `sytext`
    Base(String),
    /// Declared alias, compared by name
    Alias(String),
    /// Type variable; `id` is assigned by [`TypeTerm::identify`]
    Generic { name: String, id: Option<u64> },
    List(Box<TypeTerm>),
    Dict(Box<TypeTerm>),
    Record(Vec<(String, TypeTerm)>),
    Tuple(Vec<TypeTerm>),
    Function(Box<TypeTerm>, Box<TypeTerm>),
    Void,
}

/// Two terms that could not be unified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot unify '{left}' with '{right}'")]
pub struct InferTypeError {
    pub left: String,
    pub right: String,
}

impl InferTypeError {
    fn new(left: &TypeTerm, right: &TypeTerm) -> Self {
        Self {
            left: left.to_string(),
            right: right.to_string(),
        }
    }
}

/// A type string that does not follow the grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid type '{input}' at {position}: {message}")]
pub struct TypeParseError {
    pub input: String,
    pub position: usize,
    pub message: String,
}

impl TypeTerm {
    pub fn base(name: impl Into<String>) -> Self {
        TypeTerm::Base(name.into())
    }

    pub fn generic(name: impl Into<String>) -> Self {
        TypeTerm::Generic {
            name: name.into(),
            id: None,
        }
    }

    pub fn list(inner: TypeTerm) -> Self {
        TypeTerm::List(Box::new(inner))
    }

    pub fn function(arg: TypeTerm, result: TypeTerm) -> Self {
        TypeTerm::Function(Box::new(arg), Box::new(result))
    }

    /// Curried function over `arity` fresh generics: `<t1> -> ... -> <tn>`.
    ///
    /// Generics are named `{prefix}{i}` and left unidentified.
    pub fn curried(prefix: &str, arity: usize) -> Self {
        let mut terms: Vec<TypeTerm> = (1..=arity.max(1))
            .map(|i| TypeTerm::generic(format!("{}{}", prefix, i)))
            .collect();
        let mut result = terms.pop().unwrap_or(TypeTerm::Void);
        while let Some(arg) = terms.pop() {
            result = TypeTerm::function(arg, result);
        }
        result
    }

    pub fn parse(input: &str) -> Result<Self, TypeParseError> {
        Parser::new(input)?.parse_all()
    }

    pub fn is_generic(&self) -> bool {
        matches!(self, TypeTerm::Generic { .. })
    }

    /// Names of all generics in the term, in order of first appearance.
    pub fn generics(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.visit(&mut |term| {
            if let TypeTerm::Generic { name, .. } = term {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        });
        names
    }

    fn visit(&self, f: &mut impl FnMut(&TypeTerm)) {
        f(self);
        match self {
            TypeTerm::List(inner) | TypeTerm::Dict(inner) => inner.visit(f),
            TypeTerm::Record(fields) => fields.iter().for_each(|(_, t)| t.visit(f)),
            TypeTerm::Tuple(items) => items.iter().for_each(|t| t.visit(f)),
            TypeTerm::Function(arg, result) => {
                arg.visit(f);
                result.visit(f);
            }
            _ => {}
        }
    }

    fn map_generics(&self, f: &mut impl FnMut(&str, Option<u64>) -> TypeTerm) -> TypeTerm {
        match self {
            TypeTerm::Generic { name, id } => f(name, *id),
            TypeTerm::List(inner) => TypeTerm::List(Box::new(inner.map_generics(f))),
            TypeTerm::Dict(inner) => TypeTerm::Dict(Box::new(inner.map_generics(f))),
            TypeTerm::Record(fields) => TypeTerm::Record(
                fields
                    .iter()
                    .map(|(n, t)| (n.clone(), t.map_generics(f)))
                    .collect(),
            ),
            TypeTerm::Tuple(items) => {
                TypeTerm::Tuple(items.iter().map(|t| t.map_generics(f)).collect())
            }
            TypeTerm::Function(arg, result) => TypeTerm::Function(
                Box::new(arg.map_generics(f)),
                Box::new(result.map_generics(f)),
            ),
            other => other.clone(),
        }
    }

    /// Give every generic an id. Generics with the same name share the id
    /// recorded in `scope`; new names draw a fresh id from `supply`.
    pub fn identify(&self, scope: &mut HashMap<String, u64>, supply: &mut GenericIdSupply) -> TypeTerm {
        self.map_generics(&mut |name, _| TypeTerm::Generic {
            name: name.to_string(),
            id: Some(*scope.entry(name.to_string()).or_insert_with(|| supply.fresh())),
        })
    }

    /// Substitute every bound generic with its (recursively instantiated)
    /// binding. Unbound generics are kept.
    pub fn instantiate(&self, mapping: &TypeMapping) -> TypeTerm {
        self.map_generics(&mut |name, id| {
            let key = GenericKey::of(name, id);
            match mapping.binding(&key) {
                Some(bound) => bound.instantiate(mapping),
                None => TypeTerm::Generic {
                    name: name.to_string(),
                    id,
                },
            }
        })
    }

    /// Trial unification on a scratch mapping.
    pub fn matches(&self, other: &TypeTerm) -> bool {
        if matches!(self, TypeTerm::Any) || matches!(other, TypeTerm::Any) {
            return true;
        }
        unify(self, other, &mut TypeMapping::new()).is_ok()
    }
}

impl FromStr for TypeTerm {
    type Err = TypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TypeTerm::parse(s)
    }
}

impl fmt::Display for TypeTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTerm::Any => write!(f, "*"),
            TypeTerm::Base(name) | TypeTerm::Alias(name) => write!(f, "{}", name),
            TypeTerm::Generic { name, .. } => write!(f, "<{}>", name),
            TypeTerm::List(inner) => write!(f, "[{}]", inner),
            TypeTerm::Dict(inner) => write!(f, "{{{}}}", inner),
            TypeTerm::Record(fields) => {
                write!(f, "(")?;
                for (i, (name, term)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, term)?;
                }
                write!(f, ")")
            }
            TypeTerm::Tuple(items) => {
                write!(f, "(")?;
                for (i, term) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", term)?;
                }
                write!(f, ")")
            }
            TypeTerm::Function(arg, result) => {
                if matches!(**arg, TypeTerm::Function(..)) {
                    write!(f, "({}) -> {}", arg, result)
                } else {
                    write!(f, "{} -> {}", arg, result)
                }
            }
            TypeTerm::Void => write!(f, "()"),
        }
    }
}

// ─────────────────────────────── Generics ────────────────────────────────

/// Monotonic source of generic ids, owned by one document.
#[derive(Debug, Clone, Default)]
pub struct GenericIdSupply {
    next: u64,
}

impl GenericIdSupply {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self) -> u64 {
        self.next += 1;
        self.next
    }
}

/// Identity of a generic inside a mapping: its id, or its name when it has
/// not been identified.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GenericKey {
    Id(u64),
    Name(String),
}

impl GenericKey {
    fn of(name: &str, id: Option<u64>) -> Self {
        match id {
            Some(id) => GenericKey::Id(id),
            None => GenericKey::Name(name.to_string()),
        }
    }
}

/// Bindings produced by unification. Keys that were unified with each other
/// point at the same variable.
#[derive(Debug, Clone, Default)]
pub struct TypeMapping {
    keys: HashMap<GenericKey, usize>,
    vars: Vec<Option<TypeTerm>>,
}

impl TypeMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Current binding of a key.
    pub fn binding(&self, key: &GenericKey) -> Option<&TypeTerm> {
        self.keys
            .get(key)
            .and_then(|var| self.vars.get(*var))
            .and_then(|value| value.as_ref())
    }

    /// Resolved binding of a generic by name, instantiated.
    pub fn resolve_name(&self, name: &str) -> Option<TypeTerm> {
        self.keys
            .iter()
            .find(|(key, _)| match key {
                GenericKey::Name(n) => n == name,
                GenericKey::Id(_) => false,
            })
            .and_then(|(key, _)| self.binding(key))
            .map(|t| t.instantiate(self))
    }

    fn new_var(&mut self, value: Option<TypeTerm>) -> usize {
        self.vars.push(value);
        self.vars.len() - 1
    }

    fn merge(&mut self, keep: usize, drop: usize) {
        for var in self.keys.values_mut() {
            if *var == drop {
                *var = keep;
            }
        }
    }

    fn var_of(&mut self, key: GenericKey) -> usize {
        if let Some(var) = self.keys.get(&key) {
            return *var;
        }
        let var = self.new_var(None);
        self.keys.insert(key, var);
        var
    }

    /// Whether `term` mentions a generic belonging to `var`, following
    /// bindings.
    fn var_occurs(&self, var: usize, term: &TypeTerm) -> bool {
        match term {
            TypeTerm::Generic { name, id } => match self.keys.get(&GenericKey::of(name, *id)) {
                Some(other) if *other == var => true,
                Some(other) => self.vars[*other]
                    .as_ref()
                    .is_some_and(|bound| self.var_occurs(var, bound)),
                None => false,
            },
            TypeTerm::List(inner) | TypeTerm::Dict(inner) => self.var_occurs(var, inner),
            TypeTerm::Record(fields) => fields.iter().any(|(_, t)| self.var_occurs(var, t)),
            TypeTerm::Tuple(items) => items.iter().any(|t| self.var_occurs(var, t)),
            TypeTerm::Function(arg, result) => {
                self.var_occurs(var, arg) || self.var_occurs(var, result)
            }
            _ => false,
        }
    }

    /// Fails when the binding of `var` refers back to `var`.
    fn check_acyclic(&self, var: usize, a: &TypeTerm, b: &TypeTerm) -> Result<(), InferTypeError> {
        match &self.vars[var] {
            Some(bound) if self.var_occurs(var, bound) => Err(InferTypeError::new(a, b)),
            _ => Ok(()),
        }
    }
}

/// Unify two terms, extending `mapping`.
pub fn unify(a: &TypeTerm, b: &TypeTerm, mapping: &mut TypeMapping) -> Result<(), InferTypeError> {
    match (a, b) {
        (TypeTerm::Any, _) | (_, TypeTerm::Any) => Ok(()),
        (TypeTerm::Generic { name: n1, id: i1 }, TypeTerm::Generic { name: n2, id: i2 }) => {
            unify_generics(GenericKey::of(n1, *i1), GenericKey::of(n2, *i2), a, b, mapping)
        }
        (TypeTerm::Generic { name, id }, other) | (other, TypeTerm::Generic { name, id }) => {
            unify_generic(GenericKey::of(name, *id), a, b, other, mapping)
        }
        (TypeTerm::List(x), TypeTerm::List(y)) | (TypeTerm::Dict(x), TypeTerm::Dict(y)) => {
            unify(x, y, mapping)
        }
        (TypeTerm::Function(a1, r1), TypeTerm::Function(a2, r2)) => {
            unify(a1, a2, mapping)?;
            unify(r1, r2, mapping)
        }
        (TypeTerm::Record(f1), TypeTerm::Record(f2)) => {
            if f1.len() != f2.len() || f1.iter().zip(f2).any(|((n1, _), (n2, _))| n1 != n2) {
                return Err(InferTypeError::new(a, b));
            }
            for ((_, t1), (_, t2)) in f1.iter().zip(f2) {
                unify(t1, t2, mapping)?;
            }
            Ok(())
        }
        (TypeTerm::Tuple(t1), TypeTerm::Tuple(t2)) => {
            if t1.len() != t2.len() {
                return Err(InferTypeError::new(a, b));
            }
            for (x, y) in t1.iter().zip(t2) {
                unify(x, y, mapping)?;
            }
            Ok(())
        }
        (TypeTerm::Base(n1), TypeTerm::Base(n2)) | (TypeTerm::Alias(n1), TypeTerm::Alias(n2))
            if n1 == n2 =>
        {
            Ok(())
        }
        (TypeTerm::Void, TypeTerm::Void) => Ok(()),
        _ => Err(InferTypeError::new(a, b)),
    }
}

fn unify_generic(
    key: GenericKey,
    a: &TypeTerm,
    b: &TypeTerm,
    other: &TypeTerm,
    mapping: &mut TypeMapping,
) -> Result<(), InferTypeError> {
    let var = mapping.var_of(key);
    match mapping.vars[var].clone() {
        Some(bound) => unify(&bound, other, mapping),
        None => {
            if mapping.var_occurs(var, other) {
                return Err(InferTypeError::new(a, b));
            }
            mapping.vars[var] = Some(other.clone());
            Ok(())
        }
    }
}

fn unify_generics(
    k1: GenericKey,
    k2: GenericKey,
    a: &TypeTerm,
    b: &TypeTerm,
    mapping: &mut TypeMapping,
) -> Result<(), InferTypeError> {
    if k1 == k2 {
        return Ok(());
    }
    let keep = match (mapping.keys.get(&k1).copied(), mapping.keys.get(&k2).copied()) {
        (None, None) => {
            let var = mapping.new_var(None);
            mapping.keys.insert(k1, var);
            mapping.keys.insert(k2, var);
            return Ok(());
        }
        (Some(var), None) => {
            mapping.keys.insert(k2, var);
            var
        }
        (None, Some(var)) => {
            mapping.keys.insert(k1, var);
            var
        }
        (Some(v1), Some(v2)) if v1 == v2 => return Ok(()),
        (Some(v1), Some(v2)) => match (mapping.vars[v1].clone(), mapping.vars[v2].clone()) {
            (Some(t1), Some(t2)) => {
                unify(&t1, &t2, mapping)?;
                mapping.merge(v1, v2);
                v1
            }
            (_, None) => {
                mapping.merge(v1, v2);
                v1
            }
            (None, Some(_)) => {
                mapping.merge(v2, v1);
                v2
            }
        },
    };
    mapping.check_acyclic(keep, a, b)
}

// ──────────────────────────────── Aliases ────────────────────────────────

/// Declared type aliases. Identifiers naming a declared alias parse as
/// [`TypeTerm::Alias`] instead of [`TypeTerm::Base`].
#[derive(Debug, Clone, Default)]
pub struct TypeAliases {
    aliases: HashMap<String, TypeTerm>,
}

impl TypeAliases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: impl Into<String>, body: &str) -> Result<(), TypeParseError> {
        let term = self.parse(body)?;
        self.aliases.insert(name.into(), term);
        Ok(())
    }

    /// Parse a declaration of the form `alias name = T`.
    pub fn declare(&mut self, declaration: &str) -> Result<String, TypeParseError> {
        let error = |message: &str| TypeParseError {
            input: declaration.to_string(),
            position: 0,
            message: message.to_string(),
        };
        let rest = declaration
            .trim()
            .strip_prefix("alias")
            .ok_or_else(|| error("expected 'alias'"))?;
        let (name, body) = rest.split_once('=').ok_or_else(|| error("expected '='"))?;
        let name = name.trim();
        if name.is_empty() || !name.chars().all(is_ident_char) {
            return Err(error("expected alias name"));
        }
        self.define(name, body.trim())?;
        Ok(name.to_string())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.aliases.contains_key(name)
    }

    /// Body of a declared alias.
    pub fn expand(&self, name: &str) -> Option<&TypeTerm> {
        self.aliases.get(name)
    }

    /// Parse a type, resolving declared aliases.
    pub fn parse(&self, input: &str) -> Result<TypeTerm, TypeParseError> {
        let term = TypeTerm::parse(input)?;
        Ok(self.resolve(&term))
    }

    fn resolve(&self, term: &TypeTerm) -> TypeTerm {
        match term {
            TypeTerm::Base(name) if self.contains(name) => TypeTerm::Alias(name.clone()),
            TypeTerm::List(inner) => TypeTerm::List(Box::new(self.resolve(inner))),
            TypeTerm::Dict(inner) => TypeTerm::Dict(Box::new(self.resolve(inner))),
            TypeTerm::Record(fields) => TypeTerm::Record(
                fields
                    .iter()
                    .map(|(n, t)| (n.clone(), self.resolve(t)))
                    .collect(),
            ),
            TypeTerm::Tuple(items) => TypeTerm::Tuple(items.iter().map(|t| self.resolve(t)).collect()),
            TypeTerm::Function(arg, result) => {
                TypeTerm::Function(Box::new(self.resolve(arg)), Box::new(self.resolve(result)))
            }
            other => other.clone(),
        }
    }
}

// ──────────────────────────────── Parser ─────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LAngle,
    RAngle,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Comma,
    Colon,
    Arrow,
    Star,
    Ident(String),
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Result<Self, TypeParseError> {
        let mut tokens = Vec::new();
        let mut chars = input.char_indices().peekable();
        while let Some((offset, c)) = chars.next() {
            let token = match c {
                c if c.is_whitespace() => continue,
                '<' => Token::LAngle,
                '>' => Token::RAngle,
                '[' => Token::LBracket,
                ']' => Token::RBracket,
                '{' => Token::LBrace,
                '}' => Token::RBrace,
                '(' => Token::LParen,
                ')' => Token::RParen,
                ',' => Token::Comma,
                ':' => Token::Colon,
                '*' => Token::Star,
                '-' => match chars.next() {
                    Some((_, '>')) => Token::Arrow,
                    _ => {
                        return Err(TypeParseError {
                            input: input.to_string(),
                            position: offset,
                            message: "expected '->'".to_string(),
                        })
                    }
                },
                c if is_ident_char(c) => {
                    let mut ident = c.to_string();
                    while let Some(&(_, next)) = chars.peek() {
                        if !is_ident_char(next) {
                            break;
                        }
                        ident.push(next);
                        chars.next();
                    }
                    Token::Ident(ident)
                }
                other => {
                    return Err(TypeParseError {
                        input: input.to_string(),
                        position: offset,
                        message: format!("unexpected character '{}'", other),
                    })
                }
            };
            tokens.push((offset, token));
        }
        Ok(Self {
            input,
            tokens,
            pos: 0,
        })
    }

    fn error(&self, message: impl Into<String>) -> TypeParseError {
        let position = self
            .tokens
            .get(self.pos)
            .map(|(offset, _)| *offset)
            .unwrap_or(self.input.len());
        TypeParseError {
            input: self.input.to_string(),
            position,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|(_, t)| t)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), TypeParseError> {
        match self.peek() {
            Some(t) if *t == expected => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.error(format!("expected {:?}", expected))),
        }
    }

    fn ident(&mut self) -> Result<String, TypeParseError> {
        match self.peek() {
            Some(Token::Ident(_)) => match self.next() {
                Some(Token::Ident(name)) => Ok(name),
                _ => Err(self.error("expected identifier")),
            },
            _ => Err(self.error("expected identifier")),
        }
    }

    fn parse_all(mut self) -> Result<TypeTerm, TypeParseError> {
        if self.tokens.is_empty() {
            return Err(self.error("empty type"));
        }
        let term = self.parse_type()?;
        if self.pos != self.tokens.len() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(term)
    }

    fn parse_type(&mut self) -> Result<TypeTerm, TypeParseError> {
        let arg = self.parse_atom()?;
        if self.peek() == Some(&Token::Arrow) {
            self.pos += 1;
            let result = self.parse_type()?;
            return Ok(TypeTerm::function(arg, result));
        }
        Ok(arg)
    }

    fn parse_atom(&mut self) -> Result<TypeTerm, TypeParseError> {
        match self.peek() {
            Some(Token::LAngle) => {
                self.pos += 1;
                let name = self.ident()?;
                self.expect(Token::RAngle)?;
                Ok(TypeTerm::generic(name))
            }
            Some(Token::LBracket) => {
                self.pos += 1;
                let inner = self.parse_type()?;
                self.expect(Token::RBracket)?;
                Ok(TypeTerm::List(Box::new(inner)))
            }
            Some(Token::LBrace) => {
                self.pos += 1;
                let inner = self.parse_type()?;
                self.expect(Token::RBrace)?;
                Ok(TypeTerm::Dict(Box::new(inner)))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                self.parse_parenthesized()
            }
            Some(Token::Star) => {
                self.pos += 1;
                Ok(TypeTerm::Any)
            }
            Some(Token::Ident(_)) => Ok(TypeTerm::Base(self.ident()?)),
            _ => Err(self.error("expected type")),
        }
    }

    /// Everything after an opening parenthesis.
    fn parse_parenthesized(&mut self) -> Result<TypeTerm, TypeParseError> {
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(TypeTerm::Void);
        }
        let is_record = matches!(self.peek(), Some(Token::Ident(_)))
            && self.peek_at(1) == Some(&Token::Colon);
        if is_record {
            let mut fields = Vec::new();
            loop {
                let name = self.ident()?;
                self.expect(Token::Colon)?;
                fields.push((name, self.parse_type()?));
                match self.next() {
                    Some(Token::Comma) => continue,
                    Some(Token::RParen) => break,
                    _ => return Err(self.error("expected ',' or ')' in record")),
                }
            }
            return Ok(TypeTerm::Record(fields));
        }

        let mut items = vec![self.parse_type()?];
        loop {
            match self.next() {
                Some(Token::Comma) => items.push(self.parse_type()?),
                Some(Token::RParen) => break,
                _ => return Err(self.error("expected ',' or ')'")),
            }
        }
        if items.len() == 1 {
            Ok(items.remove(0))
        } else {
            Ok(TypeTerm::Tuple(items))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> TypeTerm {
        TypeTerm::parse(s).unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        for text in [
            "sytable",
            "<a>",
            "[sytable]",
            "{<a>}",
            "(a: sytable, b: [sytext])",
            "(sytable, sytext)",
            "()",
            "<a> -> <b> -> <c>",
            "(<a> -> <b>) -> [<a>] -> [<b>]",
        ] {
            assert_eq!(parse(text).to_string(), text);
        }
    }

    #[test]
    fn test_function_is_right_associative() {
        let term = parse("a -> b -> c");
        assert_eq!(
            term,
            TypeTerm::function(
                TypeTerm::base("a"),
                TypeTerm::function(TypeTerm::base("b"), TypeTerm::base("c"))
            )
        );
        assert_eq!(parse("(a)").to_string(), "a");
    }

    #[test]
    fn test_parse_errors() {
        assert!(TypeTerm::parse("").is_err());
        assert!(TypeTerm::parse("[a").is_err());
        assert!(TypeTerm::parse("a -").is_err());
        let err = TypeTerm::parse("a ? b").unwrap_err();
        assert_eq!(err.position, 2);
    }

    #[test]
    fn test_unify_binds_generic() {
        let mut mapping = TypeMapping::new();
        unify(&parse("<a>"), &parse("int"), &mut mapping).unwrap();
        assert_eq!(mapping.resolve_name("a"), Some(parse("int")));

        let source = parse("[<a>] -> [<a>]");
        assert_eq!(source.instantiate(&mapping).to_string(), "[int] -> [int]");
    }

    #[test]
    fn test_unify_function_against_list_argument() {
        let mut mapping = TypeMapping::new();
        unify(&parse("<a> -> <a>"), &parse("[int] -> <b>"), &mut mapping).unwrap();
        assert_eq!(
            parse("<a> -> <a>").instantiate(&mapping).to_string(),
            "[int] -> [int]"
        );
        assert_eq!(parse("<b>").instantiate(&mapping).to_string(), "[int]");
    }

    #[test]
    fn test_unify_mismatch() {
        let mut mapping = TypeMapping::new();
        let err = unify(&parse("[a]"), &parse("{a}"), &mut mapping).unwrap_err();
        assert_eq!(err.left, "[a]");
        assert!(unify(&parse("a"), &parse("b"), &mut mapping).is_err());
        assert!(unify(&parse("(a, b)"), &parse("(a, b, c)"), &mut mapping).is_err());
        assert!(unify(&parse("(x: a)"), &parse("(x: a, y: b)"), &mut mapping).is_err());
        assert!(unify(&parse("(x: a)"), &parse("(y: a)"), &mut mapping).is_err());
    }

    #[test]
    fn test_bound_generic_conflict() {
        let mut mapping = TypeMapping::new();
        unify(&parse("<a>"), &parse("int"), &mut mapping).unwrap();
        assert!(unify(&parse("<a>"), &parse("str"), &mut mapping).is_err());
        assert!(unify(&parse("<a>"), &parse("int"), &mut mapping).is_ok());
    }

    #[test]
    fn test_generic_generic_merge() {
        let mut mapping = TypeMapping::new();
        unify(&parse("<a>"), &parse("<b>"), &mut mapping).unwrap();
        unify(&parse("<b>"), &parse("sytable"), &mut mapping).unwrap();
        assert_eq!(parse("<a>").instantiate(&mapping), parse("sytable"));

        let mut mapping = TypeMapping::new();
        unify(&parse("<a>"), &parse("int"), &mut mapping).unwrap();
        unify(&parse("<b>"), &parse("str"), &mut mapping).unwrap();
        assert!(unify(&parse("<a>"), &parse("<b>"), &mut mapping).is_err());
    }

    #[test]
    fn test_occurs_check() {
        let mut mapping = TypeMapping::new();
        assert!(unify(&parse("<a>"), &parse("[<a>]"), &mut mapping).is_err());
    }

    #[test]
    fn test_identify_shares_ids_by_name() {
        let mut supply = GenericIdSupply::new();
        let mut scope = HashMap::new();
        let first = parse("<a> -> <b>").identify(&mut scope, &mut supply);
        let second = parse("[<a>]").identify(&mut scope, &mut supply);
        let other = parse("<a>").identify(&mut HashMap::new(), &mut supply);

        let id_of = |t: &TypeTerm| {
            let mut ids = Vec::new();
            t.visit(&mut |x| {
                if let TypeTerm::Generic { id, .. } = x {
                    ids.push(*id);
                }
            });
            ids
        };
        assert_eq!(id_of(&first)[0], id_of(&second)[0]);
        assert_ne!(id_of(&first)[0], id_of(&first)[1]);
        assert_ne!(id_of(&first)[0], id_of(&other)[0]);

        // Identified generics from different scopes do not alias.
        let mut mapping = TypeMapping::new();
        unify(&first, &parse("int -> str"), &mut mapping).unwrap();
        assert_eq!(other.instantiate(&mapping), other);
        assert_eq!(second.instantiate(&mapping).to_string(), "[int]");
    }

    #[test]
    fn test_any_matches_everything() {
        assert!(TypeTerm::Any.matches(&parse("[sytable]")));
        assert!(parse("*").matches(&parse("a -> b")));
        assert!(!parse("a").matches(&parse("b")));
        assert!(parse("<a>").matches(&parse("b")));
    }

    #[test]
    fn test_aliases() {
        let mut aliases = TypeAliases::new();
        let name = aliases.declare("alias mytable = [sytable]").unwrap();
        assert_eq!(name, "mytable");
        assert!(aliases.contains("mytable"));

        let term = aliases.parse("[mytable]").unwrap();
        assert_eq!(term, TypeTerm::list(TypeTerm::Alias("mytable".into())));
        assert!(term.matches(&aliases.parse("[mytable]").unwrap()));
        assert!(!TypeTerm::Alias("mytable".into()).matches(&TypeTerm::Alias("other".into())));
        assert_eq!(aliases.expand("mytable"), Some(&parse("[sytable]")));
        assert!(aliases.declare("mytable = a").is_err());
    }

    #[test]
    fn test_curried() {
        assert_eq!(TypeTerm::curried("t", 3).to_string(), "<t1> -> <t2> -> <t3>");
        assert_eq!(TypeTerm::curried("t", 1).to_string(), "<t1>");
    }
}
