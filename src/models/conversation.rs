// Conversation lookup model.
// The realtime fabric consults this for typing-indicator routing and the
// presence peer set; message content itself lives outside this core.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::conversations;

/// A direct-message conversation between two users.
/// Participant columns are order-normalized (user_a < user_b) so each pair
/// maps to exactly one row.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = conversations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Conversation {
    pub id: Uuid,
    pub user_a: Uuid,
    pub user_b: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = conversations)]
pub struct NewConversation {
    pub user_a: Uuid,
    pub user_b: Uuid,
}

#[derive(thiserror::Error, Debug)]
pub enum ConversationError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection pool error")]
    Pool(String),
}

/// Normalize a participant pair to (low, high)
fn ordered_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Conversation {
    /// Create (or fetch) the conversation between two users
    pub async fn create(
        conn: &mut AsyncPgConnection,
        first: Uuid,
        second: Uuid,
    ) -> Result<Self, ConversationError> {
        use crate::schema::conversations::dsl::*;

        let (low, high) = ordered_pair(first, second);

        if let Some(existing) = Self::find_between(conn, low, high).await? {
            return Ok(existing);
        }

        diesel::insert_into(conversations)
            .values(&NewConversation {
                user_a: low,
                user_b: high,
            })
            .get_result::<Conversation>(conn)
            .await
            .map_err(ConversationError::Database)
    }

    /// Find a conversation by id
    pub async fn find_by_id(
        conn: &mut AsyncPgConnection,
        conversation_id: Uuid,
    ) -> Result<Option<Self>, ConversationError> {
        use crate::schema::conversations::dsl::*;

        conversations
            .filter(id.eq(conversation_id))
            .first::<Conversation>(conn)
            .await
            .optional()
            .map_err(ConversationError::Database)
    }

    /// Find the conversation between two users, if one exists
    pub async fn find_between(
        conn: &mut AsyncPgConnection,
        first: Uuid,
        second: Uuid,
    ) -> Result<Option<Self>, ConversationError> {
        use crate::schema::conversations::dsl::*;

        let (low, high) = ordered_pair(first, second);

        conversations
            .filter(user_a.eq(low))
            .filter(user_b.eq(high))
            .first::<Conversation>(conn)
            .await
            .optional()
            .map_err(ConversationError::Database)
    }

    /// All users who share a conversation with the given user
    pub async fn peer_ids_for_user(
        conn: &mut AsyncPgConnection,
        user: Uuid,
    ) -> Result<Vec<Uuid>, ConversationError> {
        use crate::schema::conversations::dsl::*;

        let rows: Vec<(Uuid, Uuid)> = conversations
            .filter(user_a.eq(user).or(user_b.eq(user)))
            .select((user_a, user_b))
            .load(conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(a, b)| if a == user { b } else { a })
            .collect())
    }

    /// The other participant, if the given user is part of this conversation
    pub fn peer_of(&self, user: Uuid) -> Option<Uuid> {
        if self.user_a == user {
            Some(self.user_b)
        } else if self.user_b == user {
            Some(self.user_a)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_pair() {
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);
        assert_eq!(ordered_pair(low, high), (low, high));
        assert_eq!(ordered_pair(high, low), (low, high));
    }

    #[test]
    fn test_peer_of() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let stranger = Uuid::from_u128(3);
        let conversation = Conversation {
            id: Uuid::new_v4(),
            user_a: a,
            user_b: b,
            created_at: Utc::now(),
        };

        assert_eq!(conversation.peer_of(a), Some(b));
        assert_eq!(conversation.peer_of(b), Some(a));
        assert_eq!(conversation.peer_of(stranger), None);
    }
}
