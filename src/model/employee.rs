use mongodb::bson;
use serde::{Deserialize, Serialize};

/// Employee as written to the `employees` collection.
///
/// `passwordHash` is replicated on purpose: the offline mobile client
/// authenticates cashiers against the document store. Salary transactions are
/// embedded in full with every write, so an employee document is never
/// observed without its history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeDoc {
    #[serde(rename = "_id")]
    pub id: i64,
    pub employee_id: i64,
    pub username: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: bson::DateTime,
    pub last_login: Option<bson::DateTime>,
    pub monthly_salary: bson::Decimal128,
    pub current_balance: bson::Decimal128,
    pub salary_transactions: Vec<SalaryTransactionDoc>,
}

/// One salary movement, embedded in its employee.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalaryTransactionDoc {
    pub id: i64,
    pub employee_id: i64,
    pub amount: bson::Decimal128,
    pub transaction_type: String,
    pub transaction_date: bson::DateTime,
    pub notes: Option<String>,
}

impl EmployeeDoc {
    pub fn into_document(self) -> anyhow::Result<bson::Document> {
        Ok(bson::to_document(&self)?)
    }
}
