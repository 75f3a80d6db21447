use crate::error::RpcError;
use crate::types::RowDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    Update,
    Insert,
}

impl AccessMode {
    pub fn wire_id(self) -> i32 {
        match self {
            AccessMode::ReadOnly => 0,
            AccessMode::Update => 1,
            AccessMode::Insert => 2,
        }
    }

    pub fn from_wire_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(AccessMode::ReadOnly),
            1 => Some(AccessMode::Update),
            2 => Some(AccessMode::Insert),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionMode {
    ForwardOnly,
    Scrollable,
}

impl PositionMode {
    pub fn wire_id(self) -> i32 {
        match self {
            PositionMode::ForwardOnly => 0,
            PositionMode::Scrollable => 1,
        }
    }

    pub fn from_wire_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(PositionMode::ForwardOnly),
            1 => Some(PositionMode::Scrollable),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDirection {
    Next,
    Prior,
    First,
    Last,
    Current,
    Relative(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    BeforeFirst,
    At(usize),
    AfterLast,
}

/// Access and positioning a cursor was opened with. Both sides of a
/// session hold one; the client uses it to reject illegal calls before
/// they reach the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorMode {
    pub access: AccessMode,
    pub position_mode: PositionMode,
}

impl CursorMode {
    pub fn new(access: AccessMode, position_mode: PositionMode) -> Self {
        Self {
            access,
            position_mode,
        }
    }

    /// Validate `direction` without moving.
    pub fn check_fetch(&self, direction: FetchDirection) -> Result<(), RpcError> {
        if self.access == AccessMode::Insert {
            return Err(RpcError::WrongAccess("fetch"));
        }
        if direction != FetchDirection::Next && self.position_mode != PositionMode::Scrollable {
            return Err(RpcError::NotScrollable);
        }
        Ok(())
    }
}

/// Per-column flags marking what an update writes back. Only update
/// cursors accept flags.
#[derive(Debug, Clone)]
pub struct UpdateColumns {
    enabled: bool,
    flags: Vec<bool>,
}

impl UpdateColumns {
    pub fn new(mode: CursorMode, columns: usize) -> Self {
        Self {
            enabled: mode.access == AccessMode::Update,
            flags: vec![false; columns],
        }
    }

    pub fn set(&mut self, column: usize) -> Result<(), RpcError> {
        *self.flag(column)? = true;
        Ok(())
    }

    pub fn unset(&mut self, column: usize) -> Result<(), RpcError> {
        *self.flag(column)? = false;
        Ok(())
    }

    pub fn is_set(&self, column: usize) -> bool {
        self.flags.get(column).copied().unwrap_or(false)
    }

    pub fn flagged(&self) -> Vec<usize> {
        self.flags
            .iter()
            .enumerate()
            .filter_map(|(i, flagged)| flagged.then_some(i))
            .collect()
    }

    fn flag(&mut self, column: usize) -> Result<&mut bool, RpcError> {
        if !self.enabled {
            return Err(RpcError::WrongAccess("column update flags"));
        }
        self.flags
            .get_mut(column)
            .ok_or_else(|| RpcError::NoSuchColumn(format!("#{column}")))
    }
}

/// Lifecycle of one result stream as the driver walks it.
#[derive(Debug, Clone)]
pub struct CursorState {
    descriptor: RowDescriptor,
    mode: CursorMode,
    position: Position,
}

impl CursorState {
    pub fn new(descriptor: RowDescriptor, access: AccessMode, position_mode: PositionMode) -> Self {
        Self {
            descriptor,
            mode: CursorMode::new(access, position_mode),
            position: Position::BeforeFirst,
        }
    }

    pub fn descriptor(&self) -> &RowDescriptor {
        &self.descriptor
    }

    pub fn mode(&self) -> CursorMode {
        self.mode
    }

    pub fn access(&self) -> AccessMode {
        self.mode.access
    }

    pub fn position_mode(&self) -> PositionMode {
        self.mode.position_mode
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn current(&self) -> Option<usize> {
        match self.position {
            Position::At(i) => Some(i),
            _ => None,
        }
    }

    pub fn check_fetch(&self, direction: FetchDirection) -> Result<(), RpcError> {
        self.mode.check_fetch(direction)
    }

    /// Move according to `direction` over a result of `row_count` rows and
    /// return the index of the row now current, or `None` once the cursor
    /// has run off either end. Rejected directions leave the state as is.
    pub fn fetch(&mut self, direction: FetchDirection, row_count: usize) -> Result<Option<usize>, RpcError> {
        self.check_fetch(direction)?;
        let last = row_count.checked_sub(1);
        self.position = match direction {
            FetchDirection::Next => match self.position {
                Position::BeforeFirst => at_or(0, row_count, Position::AfterLast),
                Position::At(i) => at_or(i + 1, row_count, Position::AfterLast),
                Position::AfterLast => Position::AfterLast,
            },
            FetchDirection::Prior => match self.position {
                Position::BeforeFirst | Position::At(0) => Position::BeforeFirst,
                Position::At(i) => Position::At(i - 1),
                Position::AfterLast => last.map_or(Position::BeforeFirst, Position::At),
            },
            FetchDirection::First => last.map_or(Position::AfterLast, |_| Position::At(0)),
            FetchDirection::Last => last.map_or(Position::BeforeFirst, Position::At),
            FetchDirection::Current => match self.position {
                Position::At(i) if i < row_count => Position::At(i),
                Position::At(_) => Position::AfterLast,
                other => other,
            },
            FetchDirection::Relative(offset) => {
                let base: i64 = match self.position {
                    Position::BeforeFirst => -1,
                    Position::At(i) => i as i64,
                    Position::AfterLast => row_count as i64,
                };
                let target = base.saturating_add(offset);
                if target < 0 {
                    Position::BeforeFirst
                } else if target >= row_count as i64 {
                    Position::AfterLast
                } else {
                    Position::At(target as usize)
                }
            }
        };
        Ok(self.current())
    }

    /// The driver removed the current row. Step back so the next `Next`
    /// lands on the row that followed it.
    pub fn row_removed(&mut self) {
        self.position = match self.position {
            Position::At(0) => Position::BeforeFirst,
            Position::At(i) => Position::At(i - 1),
            other => other,
        };
    }
}

fn at_or(index: usize, row_count: usize, otherwise: Position) -> Position {
    if index < row_count {
        Position::At(index)
    } else {
        otherwise
    }
}
