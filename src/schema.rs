//! Discovered structure of the transaction database.
//!
//! The `Display` output of [`DatabaseSchema`] is what the model reads when it
//! calls `discover_database`, one line per table:
//!
//! ```text
//! Table: accounts | Columns: [id INTEGER (PK), owner TEXT]
//! Table: transactions | Columns: [id INTEGER (PK), account_id INTEGER, amount REAL] | Foreign Keys: [fk_transactions_0 -> accounts]
//! ```

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub is_primary_key: bool,
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.data_type)?;
        if self.is_primary_key {
            write!(f, " (PK)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub name: String,
    pub parent_table: String,
    pub referenced_table: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let columns: Vec<String> = self.columns.iter().map(|c| c.to_string()).collect();
        write!(f, "Table: {} | Columns: [{}]", self.name, columns.join(", "))?;

        if !self.foreign_keys.is_empty() {
            let fks: Vec<String> = self
                .foreign_keys
                .iter()
                .map(|fk| format!("{} -> {}", fk.name, fk.referenced_table))
                .collect();
            write!(f, " | Foreign Keys: [{}]", fks.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseSchema {
    pub tables: Vec<Table>,
}

impl DatabaseSchema {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }
}

impl fmt::Display for DatabaseSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self.tables.iter().map(|t| t.to_string()).collect();
        write!(f, "{}", lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, data_type: &str, pk: bool) -> Column {
        Column {
            name: name.to_string(),
            data_type: data_type.to_string(),
            is_primary_key: pk,
        }
    }

    #[test]
    fn test_column_display() {
        assert_eq!(column("id", "INTEGER", true).to_string(), "id INTEGER (PK)");
        assert_eq!(column("amount", "REAL", false).to_string(), "amount REAL");
    }

    #[test]
    fn test_table_without_foreign_keys() {
        let mut table = Table::new("qna");
        table.columns.push(column("id", "INTEGER", true));
        table.columns.push(column("merchant_city", "TEXT", false));
        assert_eq!(
            table.to_string(),
            "Table: qna | Columns: [id INTEGER (PK), merchant_city TEXT]"
        );
    }

    #[test]
    fn test_schema_display_with_foreign_keys() {
        let mut accounts = Table::new("accounts");
        accounts.columns.push(column("id", "INTEGER", true));

        let mut tx = Table::new("transactions");
        tx.columns.push(column("id", "INTEGER", true));
        tx.columns.push(column("account_id", "INTEGER", false));
        tx.foreign_keys.push(ForeignKey {
            name: "fk_transactions_0".to_string(),
            parent_table: "transactions".to_string(),
            referenced_table: "accounts".to_string(),
        });

        let schema = DatabaseSchema {
            tables: vec![accounts, tx],
        };
        assert_eq!(
            schema.to_string(),
            "Table: accounts | Columns: [id INTEGER (PK)]\n\
             Table: transactions | Columns: [id INTEGER (PK), account_id INTEGER] | Foreign Keys: [fk_transactions_0 -> accounts]"
        );
        assert!(schema.table("transactions").is_some());
    }

    #[test]
    fn test_empty_schema() {
        assert_eq!(DatabaseSchema::default().to_string(), "");
    }
}
