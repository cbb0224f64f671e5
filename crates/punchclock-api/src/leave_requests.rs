use chrono::{NaiveDate, Utc};
use serde_json::json;
use tracing::info;

use punchclock_types::ids::new_id;
use punchclock_types::models::{LeaveKind, LeaveRequest, LeaveStatus};
use punchclock_types::tables::Table;

use crate::backend::Filter;
use crate::facade::{Facade, FacadeError};

impl Facade {
    pub async fn leave_requests(&self, user_id: Option<&str>) -> Result<Vec<LeaveRequest>, FacadeError> {
        let mut requests: Vec<LeaveRequest> = self
            .fetch_all(Table::LeaveRequests, &Filter::eq_opt("user_id", user_id))
            .await?;
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    pub async fn request_leave(
        &self,
        user_id: &str,
        kind: LeaveKind,
        start_date: NaiveDate,
        end_date: NaiveDate,
        reason: Option<String>,
    ) -> Result<LeaveRequest, FacadeError> {
        if end_date < start_date {
            return Err(FacadeError::InvalidOperation(
                "Leave cannot end before it starts.".into(),
            ));
        }
        let request = LeaveRequest {
            id: new_id(),
            user_id: user_id.to_string(),
            kind,
            start_date,
            end_date,
            reason,
            status: LeaveStatus::Pending,
            reviewed_by: None,
            created_at: Utc::now(),
        };
        self.insert(Table::LeaveRequests, &request).await
    }

    pub async fn approve_leave(&self, id: &str, reviewer: &str) -> Result<LeaveRequest, FacadeError> {
        self.review_leave(id, reviewer, LeaveStatus::Approved).await
    }

    pub async fn reject_leave(&self, id: &str, reviewer: &str) -> Result<LeaveRequest, FacadeError> {
        self.review_leave(id, reviewer, LeaveStatus::Rejected).await
    }

    /// Withdraw a request that has not been reviewed yet.
    pub async fn cancel_leave(&self, id: &str) -> Result<(), FacadeError> {
        let request: LeaveRequest = self.fetch_one(Table::LeaveRequests, id).await?;
        if request.status != LeaveStatus::Pending {
            return Err(FacadeError::InvalidOperation(
                "Only pending requests can be withdrawn.".into(),
            ));
        }
        self.delete(Table::LeaveRequests, id).await
    }

    async fn review_leave(
        &self,
        id: &str,
        reviewer: &str,
        decision: LeaveStatus,
    ) -> Result<LeaveRequest, FacadeError> {
        let request: LeaveRequest = self.fetch_one(Table::LeaveRequests, id).await?;
        if request.status != LeaveStatus::Pending {
            return Err(FacadeError::InvalidOperation(
                "This request has already been reviewed.".into(),
            ));
        }
        let reviewed = self
            .update(
                Table::LeaveRequests,
                id,
                json!({ "status": decision, "reviewed_by": reviewer }),
            )
            .await?;
        info!("Leave request {} {:?} by {}", id, decision, reviewer);
        Ok(reviewed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use punchclock_db::LocalStore;
    use std::sync::Arc;

    fn facade() -> Facade {
        Facade::local_only(Arc::new(LocalStore::open_in_memory().unwrap()))
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, d).unwrap()
    }

    #[tokio::test]
    async fn request_then_approve() {
        let facade = facade();
        let request = facade
            .request_leave("7", LeaveKind::Vacation, date(6), date(10), Some("Trip".into()))
            .await
            .unwrap();
        assert_eq!(request.days(), 5);

        let approved = facade.approve_leave(&request.id, "1").await.unwrap();
        assert_eq!(approved.status, LeaveStatus::Approved);
        assert_eq!(approved.reviewed_by.as_deref(), Some("1"));

        assert!(matches!(
            facade.reject_leave(&request.id, "1").await,
            Err(FacadeError::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn backwards_range_is_refused() {
        let facade = facade();
        assert!(
            facade
                .request_leave("7", LeaveKind::Sick, date(10), date(6), None)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn only_pending_requests_can_be_withdrawn() {
        let facade = facade();
        let first = facade
            .request_leave("7", LeaveKind::Personal, date(1), date(1), None)
            .await
            .unwrap();
        let second = facade
            .request_leave("7", LeaveKind::Personal, date(2), date(2), None)
            .await
            .unwrap();
        facade.reject_leave(&second.id, "1").await.unwrap();

        facade.cancel_leave(&first.id).await.unwrap();
        assert!(facade.cancel_leave(&second.id).await.is_err());
        assert_eq!(facade.leave_requests(Some("7")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_request_is_not_found() {
        let facade = facade();
        assert!(matches!(
            facade.approve_leave("missing", "1").await,
            Err(FacadeError::NotFound(_))
        ));
    }
}
