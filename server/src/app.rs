use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use protocol::{FieldKind, FieldSpec, MemberSchema};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::broker::Broker;
use crate::error::{Error, Result};
use crate::procedure::Procedure;
use crate::router::{PrpcRouter, RouterBuilder};
use crate::session::SessionUser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartyStatus {
    Pending,
    Playing,
    Finished,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Party {
    pub id: String,
    pub host: SessionUser,
    pub inviteds: Vec<String>,
    pub playlist_id: String,
    pub max_round: u32,
    pub status: PartyStatus,
    pub created_at: i64,
}

/// In-process party store. The production datastore sits behind an ORM and is
/// out of scope; this keeps the demo routes honest.
#[derive(Default)]
pub struct PartyStore {
    parties: RwLock<HashMap<String, Party>>,
}

impl PartyStore {
    pub async fn insert(&self, party: Party) {
        self.parties.write().await.insert(party.id.clone(), party);
    }

    pub async fn get(&self, id: &str) -> Option<Party> {
        self.parties.read().await.get(id).cloned()
    }

    /// Pending parties the user is invited to, newest first.
    pub async fn pending_invites_for(&self, user_id: &str) -> Vec<Party> {
        let parties = self.parties.read().await;
        let mut invites: Vec<Party> = parties
            .values()
            .filter(|p| p.status == PartyStatus::Pending)
            .filter(|p| p.inviteds.iter().any(|id| id == user_id))
            .cloned()
            .collect();
        invites.sort_by_key(|p| std::cmp::Reverse(p.created_at));
        invites
    }
}

#[derive(Debug, Deserialize)]
struct CreatePartyInput {
    playlist_id: String,
    inviteds: Vec<String>,
    max_round: u32,
}

#[derive(Debug, Deserialize)]
struct JoinGameInput {
    party_id: String,
}

fn game_member_schema() -> MemberSchema {
    MemberSchema::new(vec![
        FieldSpec::required("id", FieldKind::String),
        FieldSpec::required("name", FieldKind::String),
        FieldSpec::required("image", FieldKind::String),
        FieldSpec::optional("isHost", FieldKind::Boolean),
    ])
}

/// The application's PRPC router: party creation and invite listing as public
/// routes, the game room as a presence route granted only to session users.
pub fn build_router(broker: Arc<dyn Broker>, store: Arc<PartyStore>) -> Result<PrpcRouter> {
    let create_store = store.clone();
    let invites_store = store.clone();
    let game_store = store;

    RouterBuilder::new(broker)
        .public_route(
            "party",
            Procedure::typed(move |ctx, input: CreatePartyInput| {
                let store = create_store.clone();
                async move {
                    if input.max_round < 10 {
                        return Err(Error::Input("max_round must be at least 10".to_string()));
                    }

                    let host = ctx.session.require_user()?.clone();
                    let mut inviteds = input.inviteds;
                    if !inviteds.iter().any(|id| *id == host.id) {
                        inviteds.push(host.id.clone());
                    }

                    let party = Party {
                        id: Uuid::new_v4().to_string(),
                        host,
                        inviteds,
                        playlist_id: input.playlist_id,
                        max_round: input.max_round,
                        status: PartyStatus::Pending,
                        created_at: Utc::now().timestamp(),
                    };
                    store.insert(party.clone()).await;
                    Ok(party)
                }
            })
            .protect(),
        )
        .public_route(
            "invites",
            Procedure::new(move |ctx, _input: Value| {
                let store = invites_store.clone();
                async move {
                    let user = ctx.session.require_user()?.clone();
                    let invites = store.pending_invites_for(&user.id).await;
                    Ok(serde_json::to_value(invites)?)
                }
            })
            .protect(),
        )
        .presence_route(
            "game",
            Procedure::typed(move |ctx, input: JoinGameInput| {
                let store = game_store.clone();
                async move {
                    let user = ctx.session.require_user()?.clone();
                    let party = store
                        .get(&input.party_id)
                        .await
                        .ok_or_else(|| Error::Procedure("party not found".to_string()))?;

                    if !party.inviteds.iter().any(|id| *id == user.id) {
                        return Err(Error::Authorization(format!(
                            "user '{}' is not invited",
                            user.id
                        )));
                    }

                    ctx.broker
                        .trigger(
                            Some(&party.id),
                            "game_joined",
                            json!({"user_id": user.id}),
                        )
                        .await?;

                    Ok(party)
                }
            })
            .protect(),
            game_member_schema(),
        )
        .auth(|args, ctx| async move {
            let user = ctx.session.require_user()?.clone();
            Ok(json!({
                "id": user.id,
                "name": user.name,
                "image": user.image,
                "isHost": args.data.get("isHost").and_then(Value::as_bool).unwrap_or(false),
            }))
        })
        .build()
}
