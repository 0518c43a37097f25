// libs/slot-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_models::auth::{ActorRole, User};
use shared_models::error::AppError;

use crate::models::{
    AlternativeAction, AvailabilityQuery, BookSlotRequest, CancelSlotRequest, ConflictCheckRequest,
    CreateSlotRequest, EditSlotRequest, GenerateSlotsRequest, GenerationOutcome, Slot, SlotError,
};
use crate::services::engine::SlotEngine;

// ==============================================================================
// AUTHORIZATION HELPERS
// ==============================================================================

fn caller_id(user: &User) -> Result<Uuid, AppError> {
    Uuid::parse_str(&user.id).map_err(|_| AppError::Auth("Token subject is not a valid id".to_string()))
}

fn require_operator(user: &User) -> Result<ActorRole, AppError> {
    let role = user.actor_role();
    if !role.is_operator() {
        return Err(AppError::Forbidden("Only practitioners and admins can manage slots".to_string()));
    }
    Ok(role)
}

/// Admins act on any practitioner; practitioners only on themselves.
fn require_owner(user: &User, practitioner_id: Uuid) -> Result<ActorRole, AppError> {
    let role = require_operator(user)?;
    if role.is_privileged() || caller_id(user)? == practitioner_id {
        Ok(role)
    } else {
        Err(AppError::Forbidden("Not authorized to manage another practitioner's slots".to_string()))
    }
}

fn map_slot_error(e: SlotError) -> AppError {
    match e {
        SlotError::NotFound(what) => AppError::NotFound(format!("{} not found", what)),
        SlotError::AlreadyBooked => AppError::Conflict("Slot is no longer available".to_string()),
        SlotError::ConflictDetected => {
            AppError::Conflict("Slot overlaps an existing slot for the same service".to_string())
        }
        SlotError::InvalidTransition { from, to } => {
            AppError::BadRequest(format!("Cannot move slot from {} to {}", from, to))
        }
        SlotError::HasLinkedTransaction { alternative } => AppError::ConflictWithAlternative {
            message: "Slot has a settled payment; only an admin can cancel it".to_string(),
            alternative: match alternative {
                AlternativeAction::MoveSlot => "move_slot".to_string(),
            },
        },
        SlotError::ValidationFailed(msg) => AppError::ValidationError(msg),
        SlotError::Forbidden(msg) => AppError::Forbidden(msg),
        SlotError::BackingStoreUnavailable(msg) => AppError::Unavailable(msg),
        SlotError::Database(msg) => AppError::Database(msg),
    }
}

async fn load_slot(engine: &SlotEngine, slot_id: Uuid) -> Result<Slot, AppError> {
    engine.booking.get_slot(slot_id).await.map_err(map_slot_error)
}

// ==============================================================================
// GENERATION AND CREATION
// ==============================================================================

#[axum::debug_handler]
pub async fn generate_slots(
    State(engine): State<Arc<SlotEngine>>,
    Extension(user): Extension<User>,
    Json(request): Json<GenerateSlotsRequest>,
) -> Result<Json<Value>, AppError> {
    require_owner(&user, request.practitioner_id)?;

    let outcome = engine.generator.generate(&request).await.map_err(map_slot_error)?;

    let message = match &outcome {
        GenerationOutcome::Generated(report) => format!("Generated {} slots", report.created),
        GenerationOutcome::NothingToGenerate { reason } => format!("Nothing to generate: {}", reason),
    };

    Ok(Json(json!({
        "success": true,
        "generation": outcome,
        "message": message
    })))
}

#[axum::debug_handler]
pub async fn create_slot(
    State(engine): State<Arc<SlotEngine>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateSlotRequest>,
) -> Result<Json<Value>, AppError> {
    require_owner(&user, request.practitioner_id)?;

    let slot = engine.booking.create_slot(request).await.map_err(map_slot_error)?;

    Ok(Json(json!({
        "success": true,
        "slot": slot,
        "message": "Slot created successfully"
    })))
}

// ==============================================================================
// QUERIES
// ==============================================================================

#[axum::debug_handler]
pub async fn get_available_slots(
    State(engine): State<Arc<SlotEngine>>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Value>, AppError> {
    let slots = engine.booking.available_slots(&query).await.map_err(map_slot_error)?;

    Ok(Json(json!({
        "slots": slots,
        "total": slots.len()
    })))
}

#[axum::debug_handler]
pub async fn check_slot_conflicts(
    State(engine): State<Arc<SlotEngine>>,
    Query(query): Query<ConflictCheckRequest>,
) -> Result<Json<Value>, AppError> {
    let response = engine.booking.check_conflict(&query).await.map_err(map_slot_error)?;
    Ok(Json(json!(response)))
}

#[axum::debug_handler]
pub async fn get_slot(
    State(engine): State<Arc<SlotEngine>>,
    Path(slot_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let slot = load_slot(&engine, slot_id).await?;

    // Clients see open slots and their own bookings.
    if !user.actor_role().is_operator() && slot.is_booked() && slot.client_id != Some(caller_id(&user)?) {
        return Err(AppError::Forbidden("Not authorized to view this slot".to_string()));
    }

    Ok(Json(json!(slot)))
}

// ==============================================================================
// TRANSITIONS
// ==============================================================================

#[axum::debug_handler]
pub async fn update_slot(
    State(engine): State<Arc<SlotEngine>>,
    Path(slot_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<EditSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let slot = load_slot(&engine, slot_id).await?;
    require_owner(&user, slot.practitioner_id)?;
    if let Some(target) = request.practitioner_id {
        require_owner(&user, target)?;
    }

    let outcome = engine.booking.edit_slot(slot_id, request).await.map_err(map_slot_error)?;

    Ok(Json(json!({
        "success": true,
        "slot": outcome.slot,
        "side_effects": outcome.side_effects,
        "message": "Slot updated successfully"
    })))
}

#[axum::debug_handler]
pub async fn delete_slot(
    State(engine): State<Arc<SlotEngine>>,
    Path(slot_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let slot = load_slot(&engine, slot_id).await?;
    let role = require_owner(&user, slot.practitioner_id)?;

    let outcome = engine.booking.delete_slot(slot_id, role).await.map_err(map_slot_error)?;

    Ok(Json(json!({
        "success": true,
        "slot": outcome.slot,
        "side_effects": outcome.side_effects,
        "message": "Slot deleted successfully"
    })))
}

#[axum::debug_handler]
pub async fn book_slot(
    State(engine): State<Arc<SlotEngine>>,
    Path(slot_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<BookSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let role = user.actor_role();
    if !role.is_operator() && request.client_id != caller_id(&user)? {
        return Err(AppError::Forbidden("Clients can only book slots for themselves".to_string()));
    }

    let outcome = engine.booking.book(slot_id, request).await.map_err(map_slot_error)?;

    Ok(Json(json!({
        "success": true,
        "slot": outcome.slot,
        "side_effects": outcome.side_effects,
        "message": "Slot booked successfully"
    })))
}

#[axum::debug_handler]
pub async fn cancel_slot(
    State(engine): State<Arc<SlotEngine>>,
    Path(slot_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<CancelSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let slot = load_slot(&engine, slot_id).await?;
    let role = user.actor_role();

    let allowed = match role {
        ActorRole::Admin => true,
        ActorRole::Practitioner => caller_id(&user)? == slot.practitioner_id,
        ActorRole::Client => slot.client_id.is_some() && slot.client_id == Some(caller_id(&user)?),
    };
    if !allowed {
        return Err(AppError::Forbidden("Not authorized to cancel this slot".to_string()));
    }

    debug!("Cancel of slot {} requested by {:?}", slot_id, role);
    let outcome = engine.booking.cancel(slot_id, role, request).await.map_err(map_slot_error)?;

    Ok(Json(json!({
        "success": true,
        "slot": outcome.slot,
        "side_effects": outcome.side_effects,
        "message": "Slot cancelled successfully"
    })))
}

#[axum::debug_handler]
pub async fn complete_slot(
    State(engine): State<Arc<SlotEngine>>,
    Path(slot_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let slot = load_slot(&engine, slot_id).await?;
    require_owner(&user, slot.practitioner_id)?;

    let outcome = engine.booking.complete(slot_id).await.map_err(map_slot_error)?;

    Ok(Json(json!({
        "success": true,
        "slot": outcome.slot,
        "message": "Slot completed"
    })))
}

// ==============================================================================
// MAINTENANCE
// ==============================================================================

#[axum::debug_handler]
pub async fn reap_stale_slots(
    State(engine): State<Arc<SlotEngine>>,
    Path(practitioner_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_owner(&user, practitioner_id)?;

    let report = engine.reaper.reap(practitioner_id).await.map_err(map_slot_error)?;

    Ok(Json(json!({
        "success": true,
        "reaped": report
    })))
}
