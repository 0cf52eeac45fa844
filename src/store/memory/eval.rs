//! Parsing and evaluation of update, condition and projection expressions.

use crate::{common::Item, record::Number};

use aws_sdk_dynamodb::types::AttributeValue;
use std::{cmp::Ordering, collections};

pub(super) type EvalResult<T> = std::result::Result<T, String>;

/// Alias maps sent with one request.
#[derive(Clone, Copy, Debug, Default)]
pub(super) struct Aliases<'a> {
    names: Option<&'a collections::HashMap<String, String>>,
    values: Option<&'a Item>,
}

impl<'a> Aliases<'a> {
    pub(super) fn new(names: Option<&'a collections::HashMap<String, String>>, values: Option<&'a Item>) -> Self {
        Self { names, values }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Name(String),
    Value(String),
    Word(String),
    LParen,
    RParen,
    Comma,
    Dot,
    Plus,
    Minus,
    Comparator(&'static str),
}

fn tokenize(expression: &str) -> EvalResult<Vec<Token>> {
    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = Vec::new();
    let mut position = 0;
    while position < chars.len() {
        let current = chars[position];
        let next = chars.get(position + 1).copied();
        let single = match current {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ',' => Some(Token::Comma),
            '.' => Some(Token::Dot),
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '=' => Some(Token::Comparator("=")),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push(token);
            position += 1;
            continue;
        }
        match (current, next) {
            (current, _) if current.is_whitespace() => position += 1,
            ('<', Some('>')) => {
                tokens.push(Token::Comparator("<>"));
                position += 2;
            }
            ('<', Some('=')) => {
                tokens.push(Token::Comparator("<="));
                position += 2;
            }
            ('>', Some('=')) => {
                tokens.push(Token::Comparator(">="));
                position += 2;
            }
            ('<', _) => {
                tokens.push(Token::Comparator("<"));
                position += 1;
            }
            ('>', _) => {
                tokens.push(Token::Comparator(">"));
                position += 1;
            }
            (current, _) if matches!(current, '#' | ':' | '_') || current.is_alphabetic() => {
                let start = position;
                position += 1;
                while position < chars.len() && (chars[position].is_alphanumeric() || chars[position] == '_') {
                    position += 1;
                }
                let text: String = chars[start..position].iter().collect();
                tokens.push(match current {
                    '#' => Token::Name(text),
                    ':' => Token::Value(text),
                    _ => Token::Word(text),
                });
            }
            (other, _) => return Err(format!("unexpected character `{other}` in `{expression}`")),
        }
    }
    Ok(tokens)
}

#[derive(Clone, Debug)]
pub(super) enum Operand {
    Path(Vec<String>),
    Value(AttributeValue),
    Size(Vec<String>),
    IfNotExists(Vec<String>, Box<Operand>),
    ListAppend(Box<Operand>, Box<Operand>),
    Plus(Box<Operand>, Box<Operand>),
    Minus(Box<Operand>, Box<Operand>),
}

/// A parsed condition.
#[derive(Clone, Debug)]
pub(super) enum Condition {
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
    Compare(Operand, &'static str, Operand),
    Between(Operand, Operand, Operand),
    In(Operand, Vec<Operand>),
    Exists(Vec<String>),
    NotExists(Vec<String>),
    BeginsWith(Operand, Operand),
    Contains(Operand, Operand),
}

#[derive(Clone, Debug)]
enum Action {
    Set(Vec<String>, Operand),
    Remove(Vec<String>),
    Add(Vec<String>, Operand),
    Delete(Vec<String>, Operand),
}

struct Parser<'a> {
    tokens: Vec<Token>,
    position: usize,
    aliases: Aliases<'a>,
}

impl<'a> Parser<'a> {
    fn new(expression: &str, aliases: Aliases<'a>) -> EvalResult<Self> {
        Ok(Self {
            tokens: tokenize(expression)?,
            position: 0,
            aliases,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> EvalResult<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(format!("expected {expected:?}, found {other:?}")),
        }
    }

    fn at_end(&self) -> bool {
        self.position >= self.tokens.len()
    }

    fn peek_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(found)) if found.eq_ignore_ascii_case(word))
    }

    fn peek_call(&self) -> Option<String> {
        match (self.tokens.get(self.position), self.tokens.get(self.position + 1)) {
            (Some(Token::Word(word)), Some(Token::LParen)) => Some(word.to_ascii_lowercase()),
            _ => None,
        }
    }

    fn finish(&self) -> EvalResult<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(format!("unexpected trailing token {token:?}")),
        }
    }

    fn segment(&mut self) -> EvalResult<String> {
        match self.next() {
            Some(Token::Name(alias)) => self
                .aliases
                .names
                .and_then(|names| names.get(&alias))
                .cloned()
                .ok_or_else(|| format!("name alias `{alias}` is not defined")),
            Some(Token::Word(word)) => Ok(word),
            other => Err(format!("expected an attribute path, found {other:?}")),
        }
    }

    fn path(&mut self) -> EvalResult<Vec<String>> {
        let mut segments = vec![self.segment()?];
        while self.peek() == Some(&Token::Dot) {
            self.position += 1;
            segments.push(self.segment()?);
        }
        Ok(segments)
    }

    fn operand(&mut self) -> EvalResult<Operand> {
        if let Some(function) = self.peek_call() {
            self.position += 2;
            let operand = match function.as_str() {
                "if_not_exists" => {
                    let path = self.path()?;
                    self.expect(Token::Comma)?;
                    Operand::IfNotExists(path, Box::new(self.operand()?))
                }
                "list_append" => {
                    let left = self.operand()?;
                    self.expect(Token::Comma)?;
                    Operand::ListAppend(Box::new(left), Box::new(self.operand()?))
                }
                "size" => Operand::Size(self.path()?),
                other => return Err(format!("unknown function `{other}`")),
            };
            self.expect(Token::RParen)?;
            return Ok(operand);
        }
        match self.peek() {
            Some(Token::Value(alias)) => {
                let alias = alias.clone();
                self.position += 1;
                self.aliases
                    .values
                    .and_then(|values| values.get(&alias))
                    .cloned()
                    .map(Operand::Value)
                    .ok_or_else(|| format!("value alias `{alias}` is not defined"))
            }
            _ => self.path().map(Operand::Path),
        }
    }

    fn sum(&mut self) -> EvalResult<Operand> {
        let left = self.operand()?;
        match self.peek() {
            Some(Token::Plus) => {
                self.position += 1;
                Ok(Operand::Plus(Box::new(left), Box::new(self.operand()?)))
            }
            Some(Token::Minus) => {
                self.position += 1;
                Ok(Operand::Minus(Box::new(left), Box::new(self.operand()?)))
            }
            _ => Ok(left),
        }
    }

    fn or(&mut self) -> EvalResult<Condition> {
        let mut condition = self.and()?;
        while self.peek_word("OR") {
            self.position += 1;
            condition = Condition::Or(Box::new(condition), Box::new(self.and()?));
        }
        Ok(condition)
    }

    fn and(&mut self) -> EvalResult<Condition> {
        let mut condition = self.not()?;
        while self.peek_word("AND") {
            self.position += 1;
            condition = Condition::And(Box::new(condition), Box::new(self.not()?));
        }
        Ok(condition)
    }

    fn not(&mut self) -> EvalResult<Condition> {
        if self.peek_word("NOT") {
            self.position += 1;
            return Ok(Condition::Not(Box::new(self.not()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> EvalResult<Condition> {
        if self.peek() == Some(&Token::LParen) {
            self.position += 1;
            let condition = self.or()?;
            self.expect(Token::RParen)?;
            return Ok(condition);
        }
        let function = self.peek_call();
        match function.as_deref() {
            Some("attribute_exists" | "attribute_not_exists") => {
                self.position += 2;
                let path = self.path()?;
                self.expect(Token::RParen)?;
                return Ok(match function.as_deref() {
                    Some("attribute_exists") => Condition::Exists(path),
                    _ => Condition::NotExists(path),
                });
            }
            Some("begins_with" | "contains") => {
                self.position += 2;
                let left = self.operand()?;
                self.expect(Token::Comma)?;
                let right = self.operand()?;
                self.expect(Token::RParen)?;
                return Ok(match function.as_deref() {
                    Some("begins_with") => Condition::BeginsWith(left, right),
                    _ => Condition::Contains(left, right),
                });
            }
            _ => {}
        }
        let left = self.operand()?;
        if self.peek_word("BETWEEN") {
            self.position += 1;
            let low = self.operand()?;
            if !self.peek_word("AND") {
                return Err("BETWEEN without AND".to_string());
            }
            self.position += 1;
            let high = self.operand()?;
            return Ok(Condition::Between(left, low, high));
        }
        if self.peek_word("IN") {
            self.position += 1;
            self.expect(Token::LParen)?;
            let mut candidates = vec![self.operand()?];
            while self.peek() == Some(&Token::Comma) {
                self.position += 1;
                candidates.push(self.operand()?);
            }
            self.expect(Token::RParen)?;
            return Ok(Condition::In(left, candidates));
        }
        match self.next() {
            Some(Token::Comparator(comparator)) => Ok(Condition::Compare(left, comparator, self.operand()?)),
            other => Err(format!("expected a comparison, found {other:?}")),
        }
    }

    fn actions(&mut self) -> EvalResult<Vec<Action>> {
        let mut actions = Vec::new();
        while !self.at_end() {
            let clause = match self.next() {
                Some(Token::Word(word)) => word.to_ascii_uppercase(),
                other => return Err(format!("expected an update clause, found {other:?}")),
            };
            loop {
                let action = match clause.as_str() {
                    "SET" => {
                        let path = self.path()?;
                        self.expect(Token::Comparator("="))?;
                        Action::Set(path, self.sum()?)
                    }
                    "REMOVE" => Action::Remove(self.path()?),
                    "ADD" => {
                        let path = self.path()?;
                        Action::Add(path, self.operand()?)
                    }
                    "DELETE" => {
                        let path = self.path()?;
                        Action::Delete(path, self.operand()?)
                    }
                    other => return Err(format!("unknown update clause `{other}`")),
                };
                actions.push(action);
                if self.peek() == Some(&Token::Comma) {
                    self.position += 1;
                } else {
                    break;
                }
            }
        }
        Ok(actions)
    }
}

/// Parse a condition or key-condition expression.
pub(super) fn parse_condition(expression: &str, aliases: Aliases<'_>) -> EvalResult<Condition> {
    let mut parser = Parser::new(expression, aliases)?;
    let condition = parser.or()?;
    parser.finish()?;
    Ok(condition)
}

/// Whether `item` satisfies an optional condition. An absent item is empty.
pub(super) fn matches(item: &Item, expression: Option<&str>, aliases: Aliases<'_>) -> EvalResult<bool> {
    match expression {
        Some(expression) => parse_condition(expression, aliases)?.matches(item),
        None => Ok(true),
    }
}

fn resolve<'i>(item: &'i Item, path: &[String]) -> Option<&'i AttributeValue> {
    let (first, rest) = path.split_first()?;
    let mut current = item.get(first)?;
    for segment in rest {
        match current {
            AttributeValue::M(entries) => current = entries.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

fn parent_mut<'i>(item: &'i mut Item, path: &[String]) -> EvalResult<Option<&'i mut Item>> {
    let Some((_, parents)) = path.split_last() else {
        return Err("empty attribute path".to_string());
    };
    let mut current = item;
    for segment in parents {
        match current.get_mut(segment) {
            Some(AttributeValue::M(entries)) => current = entries,
            _ => return Ok(None),
        }
    }
    Ok(Some(current))
}

fn assign(item: &mut Item, path: &[String], value: AttributeValue) -> EvalResult<()> {
    let parent = parent_mut(item, path)?
        .ok_or_else(|| format!("the document path {} is invalid for update", path.join(".")))?;
    if let Some(last) = path.last() {
        parent.insert(last.clone(), value);
    }
    Ok(())
}

fn remove(item: &mut Item, path: &[String]) -> EvalResult<()> {
    if let (Some(parent), Some(last)) = (parent_mut(item, path)?, path.last()) {
        parent.remove(last);
    }
    Ok(())
}

fn size(value: &AttributeValue) -> Option<usize> {
    match value {
        AttributeValue::S(text) => Some(text.len()),
        AttributeValue::B(blob) => Some(blob.as_ref().len()),
        AttributeValue::Ss(values) | AttributeValue::Ns(values) => Some(values.len()),
        AttributeValue::Bs(values) => Some(values.len()),
        AttributeValue::L(values) => Some(values.len()),
        AttributeValue::M(entries) => Some(entries.len()),
        _ => None,
    }
}

fn number(text: &str) -> EvalResult<Number> {
    Number::parse(text).ok_or_else(|| format!("`{text}` is not a number"))
}

fn arithmetic(left: &str, right: &str, negate: bool) -> EvalResult<String> {
    let (left, right) = (number(left)?, number(right)?);
    let result = match (left, right) {
        (Number::Int(left), Number::Int(right)) => {
            let sum = if negate {
                left.checked_sub(right)
            } else {
                left.checked_add(right)
            };
            sum.map(Number::Int)
                .ok_or_else(|| "number overflow".to_string())?
        }
        (left, right) if negate => Number::Float(left.as_f64() - right.as_f64()),
        (left, right) => Number::Float(left.as_f64() + right.as_f64()),
    };
    Ok(result.to_wire())
}

impl Operand {
    fn evaluate(&self, item: &Item) -> EvalResult<Option<AttributeValue>> {
        match self {
            Self::Path(path) => Ok(resolve(item, path).cloned()),
            Self::Value(value) => Ok(Some(value.clone())),
            Self::Size(path) => Ok(resolve(item, path)
                .and_then(size)
                .map(|size| AttributeValue::N(size.to_string()))),
            Self::IfNotExists(path, fallback) => match resolve(item, path) {
                Some(value) => Ok(Some(value.clone())),
                None => fallback.evaluate(item),
            },
            Self::ListAppend(left, right) => match (left.evaluate(item)?, right.evaluate(item)?) {
                (Some(AttributeValue::L(mut left)), Some(AttributeValue::L(right))) => {
                    left.extend(right);
                    Ok(Some(AttributeValue::L(left)))
                }
                (left, right) => Err(format!("list_append needs two lists, got {left:?} and {right:?}")),
            },
            Self::Plus(left, right) | Self::Minus(left, right) => {
                match (left.evaluate(item)?, right.evaluate(item)?) {
                    (Some(AttributeValue::N(left)), Some(AttributeValue::N(right))) => Ok(Some(
                        AttributeValue::N(arithmetic(&left, &right, matches!(self, Self::Minus(..)))?),
                    )),
                    (left, right) => Err(format!("arithmetic needs two numbers, got {left:?} and {right:?}")),
                }
            }
        }
    }
}

/// Order two scalar attributes of the same type.
pub(super) fn compare(left: &AttributeValue, right: &AttributeValue) -> Option<Ordering> {
    match (left, right) {
        (AttributeValue::S(left), AttributeValue::S(right)) => Some(left.cmp(right)),
        (AttributeValue::N(left), AttributeValue::N(right)) => {
            Number::parse(left)?.partial_cmp(&Number::parse(right)?)
        }
        (AttributeValue::B(left), AttributeValue::B(right)) => Some(left.as_ref().cmp(right.as_ref())),
        _ => None,
    }
}

fn same_elements<T, F>(left: &[T], right: &[T], equal: F) -> bool
where
    F: Fn(&T, &T) -> bool,
{
    left.len() == right.len() && left.iter().all(|value| right.iter().any(|other| equal(value, other)))
}

fn numbers_equal(left: &String, right: &String) -> bool {
    match (Number::parse(left), Number::parse(right)) {
        (Some(left), Some(right)) => left == right,
        _ => left == right,
    }
}

fn equal(left: &AttributeValue, right: &AttributeValue) -> bool {
    match (left, right) {
        (AttributeValue::Ss(left), AttributeValue::Ss(right)) => same_elements(left, right, |a, b| a == b),
        (AttributeValue::Ns(left), AttributeValue::Ns(right)) => same_elements(left, right, numbers_equal),
        (AttributeValue::Bs(left), AttributeValue::Bs(right)) => same_elements(left, right, |a, b| a == b),
        (AttributeValue::L(left), AttributeValue::L(right)) => {
            left.len() == right.len() && left.iter().zip(right).all(|(left, right)| equal(left, right))
        }
        (AttributeValue::M(left), AttributeValue::M(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .all(|(key, value)| right.get(key).is_some_and(|other| equal(value, other)))
        }
        (left, right) => match compare(left, right) {
            Some(ordering) => ordering == Ordering::Equal,
            None => left == right,
        },
    }
}

fn contains(container: &AttributeValue, needle: &AttributeValue) -> bool {
    match (container, needle) {
        (AttributeValue::S(text), AttributeValue::S(part)) => text.contains(part.as_str()),
        (AttributeValue::Ss(values), AttributeValue::S(value)) => values.contains(value),
        (AttributeValue::Ns(values), AttributeValue::N(value)) => {
            values.iter().any(|other| numbers_equal(other, value))
        }
        (AttributeValue::Bs(values), AttributeValue::B(value)) => values.contains(value),
        (AttributeValue::L(values), needle) => values.iter().any(|value| equal(value, needle)),
        _ => false,
    }
}

impl Condition {
    /// Evaluate against one item.
    pub(super) fn matches(&self, item: &Item) -> EvalResult<bool> {
        match self {
            Self::And(left, right) => Ok(left.matches(item)? && right.matches(item)?),
            Self::Or(left, right) => Ok(left.matches(item)? || right.matches(item)?),
            Self::Not(condition) => Ok(!condition.matches(item)?),
            Self::Compare(left, comparator, right) => {
                let (Some(left), Some(right)) = (left.evaluate(item)?, right.evaluate(item)?) else {
                    return Ok(*comparator == "<>");
                };
                Ok(match *comparator {
                    "=" => equal(&left, &right),
                    "<>" => !equal(&left, &right),
                    "<" => compare(&left, &right) == Some(Ordering::Less),
                    "<=" => matches!(compare(&left, &right), Some(Ordering::Less | Ordering::Equal)),
                    ">" => compare(&left, &right) == Some(Ordering::Greater),
                    ">=" => matches!(compare(&left, &right), Some(Ordering::Greater | Ordering::Equal)),
                    other => return Err(format!("unknown comparator `{other}`")),
                })
            }
            Self::Between(value, low, high) => {
                match (value.evaluate(item)?, low.evaluate(item)?, high.evaluate(item)?) {
                    (Some(value), Some(low), Some(high)) => Ok(matches!(
                        compare(&value, &low),
                        Some(Ordering::Greater | Ordering::Equal)
                    ) && matches!(
                        compare(&value, &high),
                        Some(Ordering::Less | Ordering::Equal)
                    )),
                    _ => Ok(false),
                }
            }
            Self::In(value, candidates) => {
                let Some(value) = value.evaluate(item)? else {
                    return Ok(false);
                };
                for candidate in candidates {
                    if candidate.evaluate(item)?.is_some_and(|candidate| equal(&value, &candidate)) {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Exists(path) => Ok(resolve(item, path).is_some()),
            Self::NotExists(path) => Ok(resolve(item, path).is_none()),
            Self::BeginsWith(value, prefix) => Ok(match (value.evaluate(item)?, prefix.evaluate(item)?) {
                (Some(AttributeValue::S(value)), Some(AttributeValue::S(prefix))) => value.starts_with(&prefix),
                (Some(AttributeValue::B(value)), Some(AttributeValue::B(prefix))) => {
                    value.as_ref().starts_with(prefix.as_ref())
                }
                _ => false,
            }),
            Self::Contains(container, needle) => Ok(match (container.evaluate(item)?, needle.evaluate(item)?) {
                (Some(container), Some(needle)) => contains(&container, &needle),
                _ => false,
            }),
        }
    }
}

fn add(current: Option<AttributeValue>, value: AttributeValue) -> EvalResult<AttributeValue> {
    match (current, value) {
        (None, value @ (AttributeValue::N(_) | AttributeValue::Ss(_) | AttributeValue::Ns(_) | AttributeValue::Bs(_))) => {
            Ok(value)
        }
        (Some(AttributeValue::N(current)), AttributeValue::N(amount)) => {
            arithmetic(&current, &amount, false).map(AttributeValue::N)
        }
        (Some(AttributeValue::Ss(mut current)), AttributeValue::Ss(values)) => {
            for value in values {
                if !current.contains(&value) {
                    current.push(value);
                }
            }
            Ok(AttributeValue::Ss(current))
        }
        (Some(AttributeValue::Ns(mut current)), AttributeValue::Ns(values)) => {
            for value in values {
                if !current.iter().any(|other| numbers_equal(other, &value)) {
                    current.push(value);
                }
            }
            Ok(AttributeValue::Ns(current))
        }
        (Some(AttributeValue::Bs(mut current)), AttributeValue::Bs(values)) => {
            for value in values {
                if !current.contains(&value) {
                    current.push(value);
                }
            }
            Ok(AttributeValue::Bs(current))
        }
        (current, value) => Err(format!("ADD cannot combine {current:?} with {value:?}")),
    }
}

fn subtract(current: AttributeValue, value: AttributeValue) -> EvalResult<Option<AttributeValue>> {
    let remaining = match (current, value) {
        (AttributeValue::Ss(mut current), AttributeValue::Ss(values)) => {
            current.retain(|element| !values.contains(element));
            (!current.is_empty()).then_some(AttributeValue::Ss(current))
        }
        (AttributeValue::Ns(mut current), AttributeValue::Ns(values)) => {
            current.retain(|element| !values.iter().any(|other| numbers_equal(element, other)));
            (!current.is_empty()).then_some(AttributeValue::Ns(current))
        }
        (AttributeValue::Bs(mut current), AttributeValue::Bs(values)) => {
            current.retain(|element| !values.contains(element));
            (!current.is_empty()).then_some(AttributeValue::Bs(current))
        }
        (current, value) => return Err(format!("DELETE cannot remove {value:?} from {current:?}")),
    };
    Ok(remaining)
}

/// Apply an update expression. Operands read the item as it was before the update.
pub(super) fn apply_update(item: &Item, expression: &str, aliases: Aliases<'_>) -> EvalResult<Item> {
    let mut parser = Parser::new(expression, aliases)?;
    let actions = parser.actions()?;
    if actions.is_empty() {
        return Err("update expression is empty".to_string());
    }
    let mut updated = item.clone();
    for action in actions {
        match action {
            Action::Set(path, operand) => {
                let value = operand
                    .evaluate(item)?
                    .ok_or_else(|| "an operand refers to a missing attribute".to_string())?;
                assign(&mut updated, &path, value)?;
            }
            Action::Remove(path) => remove(&mut updated, &path)?,
            Action::Add(path, operand) => {
                let value = operand
                    .evaluate(item)?
                    .ok_or_else(|| "ADD operand is missing".to_string())?;
                let current = resolve(&updated, &path).cloned();
                assign(&mut updated, &path, add(current, value)?)?;
            }
            Action::Delete(path, operand) => {
                let value = operand
                    .evaluate(item)?
                    .ok_or_else(|| "DELETE operand is missing".to_string())?;
                if let Some(current) = resolve(&updated, &path).cloned() {
                    match subtract(current, value)? {
                        Some(remaining) => assign(&mut updated, &path, remaining)?,
                        None => remove(&mut updated, &path)?,
                    }
                }
            }
        }
    }
    Ok(updated)
}

fn insert_path(projected: &mut Item, path: &[String], value: AttributeValue) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    if rest.is_empty() {
        projected.insert(first.clone(), value);
        return;
    }
    let entry = projected
        .entry(first.clone())
        .or_insert_with(|| AttributeValue::M(collections::HashMap::new()));
    if let AttributeValue::M(entries) = entry {
        insert_path(entries, rest, value);
    }
}

/// Keep only the projected paths of an item.
pub(super) fn project(item: &Item, expression: Option<&str>, aliases: Aliases<'_>) -> EvalResult<Item> {
    let Some(expression) = expression else {
        return Ok(item.clone());
    };
    let mut parser = Parser::new(expression, aliases)?;
    let mut projected = Item::new();
    loop {
        let path = parser.path()?;
        if let Some(value) = resolve(item, &path) {
            insert_path(&mut projected, &path, value.clone());
        }
        match parser.next() {
            Some(Token::Comma) => continue,
            None => break,
            Some(token) => return Err(format!("unexpected token {token:?} in projection")),
        }
    }
    Ok(projected)
}
