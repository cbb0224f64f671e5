use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use punchclock_types::ids::new_id;
use punchclock_types::models::{SalaryPayment, SalaryRecord};
use punchclock_types::tables::Table;

use crate::backend::Filter;
use crate::facade::{Facade, FacadeError};

impl Facade {
    // -- Salary records --

    /// Salary records of one user, or of everyone when `user_id` is `None`.
    pub async fn salary_records(&self, user_id: Option<&str>) -> Result<Vec<SalaryRecord>, FacadeError> {
        self.fetch_all(Table::SalaryRecords, &Filter::eq_opt("user_id", user_id))
            .await
    }

    pub async fn create_salary_record(&self, record: &SalaryRecord) -> Result<SalaryRecord, FacadeError> {
        self.insert(Table::SalaryRecords, record).await
    }

    pub async fn delete_salary_record(&self, id: &str) -> Result<(), FacadeError> {
        self.delete(Table::SalaryRecords, id).await
    }

    /// Book the payment, then mark the record paid. A record is never left
    /// paid without its payment: if the status write fails the booking is
    /// withdrawn again.
    pub async fn mark_salary_paid(&self, id: &str, at: DateTime<Utc>) -> Result<SalaryRecord, FacadeError> {
        let current: SalaryRecord = self.fetch_one(Table::SalaryRecords, id).await?;
        let payment = SalaryPayment {
            id: new_id(),
            salary_record_id: current.id.clone(),
            user_id: current.user_id.clone(),
            amount: current.amount,
            paid_at: at,
            method: None,
        };
        let booked = self.record_salary_payment(&payment).await?;

        let patch = json!({
            "status": "paid",
            "paid_date": at.to_rfc3339(),
            "updated_at": at,
        });
        match self.update(Table::SalaryRecords, id, patch).await {
            Ok(record) => {
                info!("Salary record {} marked paid", id);
                Ok(record)
            }
            Err(e) => {
                if let Err(undo) = self.delete(Table::SalaryPayments, &booked.id).await {
                    warn!("Payment {} left without a paid record: {}", booked.id, undo);
                }
                Err(e)
            }
        }
    }

    /// Employee confirmation of a payment. Leaves the `status` column alone.
    pub async fn confirm_salary_payment(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<SalaryRecord, FacadeError> {
        let record = self
            .update(
                Table::SalaryRecords,
                id,
                json!({
                    "confirmed_at": at,
                    "confirmed_by_employee": true,
                    "updated_at": at,
                }),
            )
            .await?;
        info!("Salary record {} confirmed", id);
        Ok(record)
    }

    // -- Salary payments --

    pub async fn salary_payments(
        &self,
        salary_record_id: Option<&str>,
    ) -> Result<Vec<SalaryPayment>, FacadeError> {
        self.fetch_all(
            Table::SalaryPayments,
            &Filter::eq_opt("salary_record_id", salary_record_id),
        )
        .await
    }

    pub async fn record_salary_payment(&self, payment: &SalaryPayment) -> Result<SalaryPayment, FacadeError> {
        self.insert(Table::SalaryPayments, payment).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostedBackend;
    use crate::memory::MemoryBackend;
    use punchclock_db::LocalStore;
    use punchclock_types::models::SalaryStatus;
    use std::sync::Arc;

    fn facade() -> Facade {
        Facade::local_only(Arc::new(LocalStore::open_in_memory().unwrap()))
    }

    fn hosted(backend: &Arc<MemoryBackend>) -> Facade {
        Facade::new(
            Some(backend.clone() as Arc<dyn HostedBackend>),
            Arc::new(LocalStore::open_in_memory().unwrap()),
        )
    }

    #[tokio::test]
    async fn marking_paid_books_a_payment() {
        let facade = facade();
        let record = facade
            .create_salary_record(&SalaryRecord::new("7", 2500.0))
            .await
            .unwrap();

        let paid = facade.mark_salary_paid(&record.id, Utc::now()).await.unwrap();
        assert_eq!(paid.status, SalaryStatus::Paid);

        let payments = facade.salary_payments(Some(&record.id)).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].amount, 2500.0);
        assert_eq!(payments[0].user_id.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn confirmation_keeps_paid_records_paid() {
        let facade = facade();
        let record = facade
            .create_salary_record(&SalaryRecord::new("7", 10.0))
            .await
            .unwrap();

        let confirmed = facade.confirm_salary_payment(&record.id, Utc::now()).await.unwrap();
        assert_eq!(confirmed.status, SalaryStatus::Confirmed);

        facade.mark_salary_paid(&record.id, Utc::now()).await.unwrap();
        let again = facade.confirm_salary_payment(&record.id, Utc::now()).await.unwrap();
        assert_eq!(again.status, SalaryStatus::Paid);
    }

    #[tokio::test]
    async fn records_filter_by_user() {
        let facade = facade();
        facade.create_salary_record(&SalaryRecord::new("7", 1.0)).await.unwrap();
        facade.create_salary_record(&SalaryRecord::new("9", 2.0)).await.unwrap();

        assert_eq!(facade.salary_records(Some("7")).await.unwrap().len(), 1);
        assert_eq!(facade.salary_records(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_booking_leaves_the_record_unpaid() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed(Table::SalaryRecords, vec![json!({"id": "r1", "user_id": 7, "amount": 900})]);
        let facade = hosted(&backend);

        backend.reject_writes_to(Table::SalaryPayments, true);
        assert!(facade.mark_salary_paid("r1", Utc::now()).await.is_err());

        let record: SalaryRecord = facade.fetch_one(Table::SalaryRecords, "r1").await.unwrap();
        assert_eq!(record.status, SalaryStatus::Pending);
        assert!(backend.rows(Table::SalaryPayments).is_empty());
    }

    #[tokio::test]
    async fn failed_status_write_withdraws_the_booking() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed(Table::SalaryRecords, vec![json!({"id": "r1", "user_id": 7, "amount": 900})]);
        let facade = hosted(&backend);

        backend.reject_writes_to(Table::SalaryRecords, true);
        assert!(facade.mark_salary_paid("r1", Utc::now()).await.is_err());

        assert!(backend.rows(Table::SalaryPayments).is_empty());
        assert!(facade.salary_payments(Some("r1")).await.unwrap().is_empty());
        assert_eq!(backend.rows(Table::SalaryRecords)[0].get("status"), None);
    }

    #[tokio::test]
    async fn paying_keeps_the_confirmation_fact_unset() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed(Table::SalaryRecords, vec![json!({"id": "r1", "user_id": 7, "amount": 900})]);
        let facade = hosted(&backend);

        let paid = facade.mark_salary_paid("r1", Utc::now()).await.unwrap();
        assert_eq!(paid.status, SalaryStatus::Paid);
        assert!(!paid.confirmed_by_employee);

        let created = facade
            .create_salary_record(&{
                let mut record = SalaryRecord::new("7", 10.0);
                record.mark_paid(Utc::now());
                record
            })
            .await
            .unwrap();
        let row = backend
            .rows(Table::SalaryRecords)
            .into_iter()
            .find(|r| r["id"] == created.id.as_str())
            .unwrap();
        assert_eq!(row["confirmed_by_employee"], false);
        assert_eq!(row["status"], "paid");
    }
}
