use crate::core::buffer::PropertyList;

/// One unit of work beyond a raw SQL string: the statement text plus the
/// declared schema of the expected result, if any.
#[derive(Debug, Clone)]
pub struct Command {
    sql: String,
    result_schema: Option<PropertyList>,
}

impl Command {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            result_schema: None,
        }
    }

    pub fn with_result(sql: impl Into<String>, schema: PropertyList) -> Self {
        Self {
            sql: sql.into(),
            result_schema: Some(schema),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn result_schema(&self) -> Option<&PropertyList> {
        self.result_schema.as_ref()
    }

    pub fn expects_result(&self) -> bool {
        self.result_schema.is_some()
    }
}

/// A batch of commands sharing one declared result schema. Produced buffers
/// are accumulated into a single buffer; execution stops at the first error.
#[derive(Debug, Clone, Default)]
pub struct CommandList {
    commands: Vec<String>,
    result_schema: Option<PropertyList>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(schema: PropertyList) -> Self {
        Self {
            commands: Vec::new(),
            result_schema: Some(schema),
        }
    }

    pub fn add(&mut self, sql: impl Into<String>) -> &mut Self {
        self.commands.push(sql.into());
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn result_schema(&self) -> Option<&PropertyList> {
        self.result_schema.as_ref()
    }

    pub fn expects_result(&self) -> bool {
        self.result_schema.is_some()
    }

    /// Commands rendered with the shared result schema applied to each.
    pub fn commands(&self) -> impl Iterator<Item = Command> + '_ {
        self.commands.iter().map(move |sql| match &self.result_schema {
            Some(schema) => Command::with_result(sql.clone(), schema.clone()),
            None => Command::new(sql.clone()),
        })
    }
}
