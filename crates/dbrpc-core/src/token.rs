use crate::error::RpcError;
use std::collections::HashMap;
use std::fmt;

/// Small integer handle standing in for an object that lives on the other
/// side of a session. Only meaningful to the table that minted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(i32);

impl Token {
    pub fn from_raw(raw: i32) -> Self {
        Token(raw)
    }

    pub fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-local map from tokens to live objects.
///
/// Tokens are handed out in increasing order and never come back, so a
/// stale token can only ever resolve to `TokenNotFound`.
#[derive(Debug)]
pub struct TokenTable<T> {
    entries: HashMap<Token, T>,
    next: i32,
    max_live: usize,
}

impl<T> Default for TokenTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TokenTable<T> {
    pub fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    pub fn with_limit(max_live: usize) -> Self {
        Self {
            entries: HashMap::new(),
            next: 0,
            max_live,
        }
    }

    pub fn mint(&mut self, object: T) -> Result<Token, RpcError> {
        if self.entries.len() >= self.max_live || self.next == i32::MAX {
            return Err(RpcError::TokensExhausted);
        }
        let token = Token(self.next);
        self.next += 1;
        self.entries.insert(token, object);
        Ok(token)
    }

    pub fn resolve(&self, token: Token) -> Result<&T, RpcError> {
        self.entries
            .get(&token)
            .ok_or(RpcError::TokenNotFound(token.0))
    }

    pub fn resolve_mut(&mut self, token: Token) -> Result<&mut T, RpcError> {
        self.entries
            .get_mut(&token)
            .ok_or(RpcError::TokenNotFound(token.0))
    }

    /// Invalidate `token` and hand back the object it referenced. The token
    /// is gone from the table before the caller can drop the object.
    pub fn drop_token(&mut self, token: Token) -> Result<T, RpcError> {
        self.entries
            .remove(&token)
            .ok_or(RpcError::TokenNotFound(token.0))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (Token, T)> + '_ {
        self.entries.drain()
    }

    #[cfg(test)]
    fn skip_to(&mut self, next: i32) {
        self.next = next;
    }
}
