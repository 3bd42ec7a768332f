//! Charging session repository implementation
//!
//! One row per live session leg, keyed by dialog and Session-Id. Party
//! identities and the charging vector are stored as JSONB.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ro_core::models::{
    ActiveState, ChargingSession, ChargingVector, Direction, PartyIdentities, RoutingKeys,
    SessionParams, SessionState,
};
use ro_core::traits::SessionStore;
use ro_core::{ChargingError, ChargingResult};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, error, instrument, warn};

const SESSION_COLUMNS: &str = r#"
    dialog_entry, dialog_id, session_id, call_id, direction,
    identities, charging_vector, rating_group, service_identifier,
    origin_host, auth_app_id, auth_session_type,
    reserved_secs, valid_for, is_final_allocation, redirect_uri,
    start_time, last_event_timestamp, billed_secs, hop_by_hop,
    state, active, ccr_sent
"#;

/// PostgreSQL implementation of SessionStore
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    /// Create a new session repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Parse session state from its stored name
    fn parse_state(s: &str) -> SessionState {
        SessionState::from_str(s).unwrap_or_else(|| {
            warn!("Unknown stored session state '{}', using unknown_error", s);
            SessionState::UnknownError
        })
    }

    async fn write(&self, session: &ChargingSession, sql: &str) -> ChargingResult<u64> {
        let result = sqlx::query(sql)
            .bind(i64::from(session.routing.dialog_entry))
            .bind(i64::from(session.routing.dialog_id))
            .bind(&session.session_id)
            .bind(&session.call_id)
            .bind(session.direction.as_i32() as i16)
            .bind(Json(&session.identities))
            .bind(session.charging_vector.as_ref().map(Json))
            .bind(i64::from(session.rating_group))
            .bind(i64::from(session.service_identifier))
            .bind(&session.origin_host)
            .bind(i64::from(session.auth_app_id))
            .bind(i64::from(session.auth_session_type))
            .bind(session.reserved_secs)
            .bind(session.valid_for)
            .bind(session.is_final_allocation)
            .bind(&session.redirect_uri)
            .bind(session.start_time)
            .bind(session.last_event_timestamp)
            .bind(session.billed_secs)
            .bind(i64::from(session.hop_by_hop))
            .bind(session.state.as_str())
            .bind(session.active.as_i32() as i16)
            .bind(session.ccr_sent)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!(session_id = %session.session_id, "Database error writing session: {}", e);
                ChargingError::Database(format!("Failed to write session: {}", e))
            })?;
        Ok(result.rows_affected())
    }
}

const INSERT_SQL: &str = r#"
    INSERT INTO ro_session (
        dialog_entry, dialog_id, session_id, call_id, direction,
        identities, charging_vector, rating_group, service_identifier,
        origin_host, auth_app_id, auth_session_type,
        reserved_secs, valid_for, is_final_allocation, redirect_uri,
        start_time, last_event_timestamp, billed_secs, hop_by_hop,
        state, active, ccr_sent
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
            $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23)
"#;

const UPDATE_SQL: &str = r#"
    UPDATE ro_session
    SET call_id = $4,
        direction = $5,
        identities = $6,
        charging_vector = $7,
        rating_group = $8,
        service_identifier = $9,
        origin_host = $10,
        auth_app_id = $11,
        auth_session_type = $12,
        reserved_secs = $13,
        valid_for = $14,
        is_final_allocation = $15,
        redirect_uri = $16,
        start_time = $17,
        last_event_timestamp = $18,
        billed_secs = $19,
        hop_by_hop = $20,
        state = $21,
        active = $22,
        ccr_sent = $23,
        updated_at = NOW()
    WHERE dialog_entry = $1 AND dialog_id = $2 AND session_id = $3
"#;

const UPSERT_SQL: &str = r#"
    INSERT INTO ro_session (
        dialog_entry, dialog_id, session_id, call_id, direction,
        identities, charging_vector, rating_group, service_identifier,
        origin_host, auth_app_id, auth_session_type,
        reserved_secs, valid_for, is_final_allocation, redirect_uri,
        start_time, last_event_timestamp, billed_secs, hop_by_hop,
        state, active, ccr_sent
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
            $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23)
    ON CONFLICT (dialog_entry, dialog_id, session_id) DO UPDATE
    SET reserved_secs = EXCLUDED.reserved_secs,
        valid_for = EXCLUDED.valid_for,
        is_final_allocation = EXCLUDED.is_final_allocation,
        redirect_uri = EXCLUDED.redirect_uri,
        start_time = EXCLUDED.start_time,
        last_event_timestamp = EXCLUDED.last_event_timestamp,
        billed_secs = EXCLUDED.billed_secs,
        hop_by_hop = EXCLUDED.hop_by_hop,
        state = EXCLUDED.state,
        active = EXCLUDED.active,
        ccr_sent = EXCLUDED.ccr_sent,
        updated_at = NOW()
"#;

#[async_trait]
impl SessionStore for PgSessionRepository {
    #[instrument(skip(self, session), fields(session_id = %session.session_id))]
    async fn insert(&self, session: &ChargingSession) -> ChargingResult<()> {
        debug!("Inserting session");
        self.write(session, INSERT_SQL).await?;
        Ok(())
    }

    #[instrument(skip(self, session), fields(session_id = %session.session_id))]
    async fn update(&self, session: &ChargingSession) -> ChargingResult<()> {
        if self.write(session, UPDATE_SQL).await? == 0 {
            return Err(ChargingError::SessionNotFound(session.session_id.clone()));
        }
        Ok(())
    }

    #[instrument(skip(self, session), fields(session_id = %session.session_id))]
    async fn upsert(&self, session: &ChargingSession) -> ChargingResult<()> {
        self.write(session, UPSERT_SQL).await?;
        Ok(())
    }

    #[instrument(skip(self, session), fields(session_id = %session.session_id))]
    async fn delete(&self, session: &ChargingSession) -> ChargingResult<bool> {
        let result = sqlx::query(
            "DELETE FROM ro_session WHERE dialog_entry = $1 AND dialog_id = $2 AND session_id = $3",
        )
        .bind(i64::from(session.routing.dialog_entry))
        .bind(i64::from(session.routing.dialog_id))
        .bind(&session.session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error deleting session: {}", e);
            ChargingError::Database(format!("Failed to delete session: {}", e))
        })?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn load_all(&self) -> ChargingResult<Vec<ChargingSession>> {
        let sql = format!(
            "SELECT {} FROM ro_session ORDER BY dialog_entry, dialog_id",
            SESSION_COLUMNS
        );
        let rows = sqlx::query_as::<sqlx::Postgres, SessionRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error loading sessions: {}", e);
                ChargingError::Database(format!("Failed to load sessions: {}", e))
            })?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            match ChargingSession::try_from(row) {
                Ok(session) => sessions.push(session),
                Err(e) => warn!("Skipping unreadable session row: {}", e),
            }
        }
        debug!(count = sessions.len(), "Loaded stored sessions");
        Ok(sessions)
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    dialog_entry: i64,
    dialog_id: i64,
    session_id: String,
    call_id: String,
    direction: i16,
    identities: Json<PartyIdentities>,
    charging_vector: Option<Json<ChargingVector>>,
    rating_group: i64,
    service_identifier: i64,
    origin_host: String,
    auth_app_id: i64,
    auth_session_type: i64,
    reserved_secs: i64,
    valid_for: i64,
    is_final_allocation: bool,
    redirect_uri: Option<String>,
    start_time: Option<DateTime<Utc>>,
    last_event_timestamp: DateTime<Utc>,
    billed_secs: i64,
    hop_by_hop: i64,
    state: String,
    active: i16,
    ccr_sent: bool,
}

fn to_u32(value: i64, column: &str) -> ChargingResult<u32> {
    u32::try_from(value)
        .map_err(|_| ChargingError::Serialization(format!("{} out of range: {}", column, value)))
}

impl TryFrom<SessionRow> for ChargingSession {
    type Error = ChargingError;

    fn try_from(row: SessionRow) -> ChargingResult<Self> {
        let direction = Direction::from_i32(i32::from(row.direction)).ok_or_else(|| {
            ChargingError::Serialization(format!("invalid direction {}", row.direction))
        })?;
        let params = SessionParams {
            session_id: row.session_id,
            call_id: row.call_id,
            direction,
            identities: row.identities.0,
            charging_vector: row.charging_vector.map(|v| v.0),
            rating_group: to_u32(row.rating_group, "rating_group")?,
            service_identifier: to_u32(row.service_identifier, "service_identifier")?,
            routing: RoutingKeys::new(
                to_u32(row.dialog_entry, "dialog_entry")?,
                to_u32(row.dialog_id, "dialog_id")?,
            ),
            origin_host: row.origin_host,
            auth_app_id: to_u32(row.auth_app_id, "auth_app_id")?,
            auth_session_type: to_u32(row.auth_session_type, "auth_session_type")?,
        };

        let mut session = ChargingSession::new(params, row.last_event_timestamp);
        session.reserved_secs = row.reserved_secs;
        session.valid_for = row.valid_for;
        session.is_final_allocation = row.is_final_allocation;
        session.redirect_uri = row.redirect_uri;
        session.start_time = row.start_time;
        session.billed_secs = row.billed_secs;
        session.hop_by_hop = to_u32(row.hop_by_hop, "hop_by_hop")?;
        session.state = PgSessionRepository::parse_state(&row.state);
        session.active = ActiveState::from_i32(i32::from(row.active));
        session.ccr_sent = row.ccr_sent;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row() -> SessionRow {
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap();
        SessionRow {
            dialog_entry: 17,
            dialog_id: 3,
            session_id: "scscf;1;2".to_string(),
            call_id: "call-1".to_string(),
            direction: 1,
            identities: Json(PartyIdentities::new("sip:alice@ims.test", "tel:+15550100")),
            charging_vector: None,
            rating_group: 100,
            service_identifier: 1000,
            origin_host: "scscf".to_string(),
            auth_app_id: 4,
            auth_session_type: 1,
            reserved_secs: 30,
            valid_for: 0,
            is_final_allocation: false,
            redirect_uri: None,
            start_time: Some(at),
            last_event_timestamp: at,
            billed_secs: 25,
            hop_by_hop: 1,
            state: "answered".to_string(),
            active: 1,
            ccr_sent: false,
        }
    }

    #[test]
    fn test_row_to_session() {
        let session = ChargingSession::try_from(row()).unwrap();
        assert_eq!(session.direction, Direction::Terminating);
        assert_eq!(session.routing, RoutingKeys::new(17, 3));
        assert_eq!(session.state, SessionState::Answered);
        assert_eq!(session.active, ActiveState::Active);
        assert_eq!(session.billed_secs, 25);
        assert_eq!(session.last_event_timestamp_backup, session.last_event_timestamp);
    }

    #[test]
    fn test_invalid_rows_are_rejected() {
        let mut bad = row();
        bad.direction = 7;
        assert!(ChargingSession::try_from(bad).is_err());

        let mut bad = row();
        bad.hop_by_hop = -1;
        assert!(ChargingSession::try_from(bad).is_err());
    }

    #[test]
    fn test_parse_state() {
        assert_eq!(
            PgSessionRepository::parse_state("no_more_credit"),
            SessionState::NoMoreCredit
        );
        assert_eq!(
            PgSessionRepository::parse_state("garbage"),
            SessionState::UnknownError
        );
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_session_round_trip() {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/ro_charging".to_string());
        let pool = crate::create_pool(&database_url, Some(2)).await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        let repo = PgSessionRepository::new(pool);

        let mut session = ChargingSession::try_from(row()).unwrap();
        repo.delete(&session).await.unwrap();
        repo.insert(&session).await.unwrap();
        session.billed_secs = 55;
        repo.update(&session).await.unwrap();

        let stored = repo.load_all().await.unwrap();
        let found = stored
            .iter()
            .find(|s| s.session_id == session.session_id)
            .unwrap();
        assert_eq!(found.billed_secs, 55);
        assert!(repo.delete(&session).await.unwrap());
        assert!(!repo.delete(&session).await.unwrap());
    }
}
