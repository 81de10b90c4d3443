use std::fmt;

use crate::error::CoreError;

/// One mutating operation class. Read is always implicit and never gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// The subset of mutating operations a manifest grants the engine.
///
/// Parsed from the access-permissions annotation, a subset of the letters
/// `CUD` (case-insensitive, duplicates tolerated). An absent annotation
/// means full permissions; an empty value means none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionSet {
    create: bool,
    update: bool,
    delete: bool,
}

impl PermissionSet {
    pub const fn all() -> Self {
        Self {
            create: true,
            update: true,
            delete: true,
        }
    }

    pub const fn none() -> Self {
        Self {
            create: false,
            update: false,
            delete: false,
        }
    }

    pub fn parse(value: &str) -> Result<Self, CoreError> {
        let mut set = Self::none();
        for flag in value.chars() {
            match flag.to_ascii_uppercase() {
                'C' => set.create = true,
                'U' => set.update = true,
                'D' => set.delete = true,
                _ => {
                    return Err(CoreError::InvalidPermission {
                        value: value.to_string(),
                        flag,
                    });
                }
            }
        }
        Ok(set)
    }

    pub fn allows(&self, op: Operation) -> bool {
        match op {
            Operation::Create => self.create,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
        }
    }
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if *self == Self::none() {
            return f.write_str("none");
        }
        if self.create {
            f.write_str("C")?;
        }
        if self.update {
            f.write_str("U")?;
        }
        if self.delete {
            f.write_str("D")?;
        }
        Ok(())
    }
}
