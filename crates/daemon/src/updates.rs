//! Batched entry mutations sent by a coordinating gateway.

use common::caps::Capabilities;
use common::messages::{
    EntryUpdate, MetadataUpdates, ReplyError, UpdateOutcome, UpdateReply,
    MAX_BATCH_REQUEST_SIZE,
};
use common::signed::Signed;
use common::volume::Volume;

use crate::auth::Caller;
use crate::error::{Error, Result};
use crate::resolve::volume_versions;
use crate::service_state::State;

/// Verify and apply a signed [`MetadataUpdates`] batch in order.
///
/// A rejected update becomes that slot's outcome and the batch carries on.
/// Any other failure aborts the rest of the batch.
pub async fn apply_updates(
    state: &State,
    caller: &Caller,
    volume: &Volume,
    body: &[u8],
) -> Result<UpdateReply> {
    let batch = MetadataUpdates::from_wire(body).map_err(Error::malformed)?;
    let gateway = caller
        .gateway()
        .ok_or_else(|| Error::Forbidden("updates require a gateway".to_string()))?;
    if batch.volume_id != volume.volume_id || batch.gateway_id != gateway.id() {
        return Err(Error::Forbidden(
            "batch is addressed to another volume or gateway".to_string(),
        ));
    }
    batch
        .verify_with(&gateway.cert.public_key)
        .map_err(|e| Error::Unauthenticated(format!("batch signature: {}", e)))?;
    if batch.updates.len() > MAX_BATCH_REQUEST_SIZE as usize {
        return Err(Error::malformed(format!(
            "batch of {} exceeds {}",
            batch.updates.len(),
            MAX_BATCH_REQUEST_SIZE
        )));
    }

    let identity = caller.identity();
    let entries = state.entries();
    let volume_id = volume.volume_id;
    let mut results = Vec::with_capacity(batch.updates.len());

    for update in batch.updates {
        let outcome = match update {
            EntryUpdate::Create(new) => entries
                .create(identity, volume_id, new)
                .await
                .map(UpdateOutcome::Ok),
            EntryUpdate::Update(patch) => entries
                .update(identity, volume_id, patch)
                .await
                .map(UpdateOutcome::Ok),
            EntryUpdate::Delete { file_id } => entries
                .delete(identity, volume_id, file_id)
                .await
                .map(UpdateOutcome::Deleted),
            EntryUpdate::Chcoord { file_id } => {
                if gateway.caps().allows(Capabilities::COORDINATE) {
                    entries
                        .chcoord(identity, volume_id, file_id)
                        .await
                        .map(UpdateOutcome::Ok)
                } else {
                    Err(Error::Rejected(ReplyError::PermissionDenied))
                }
            }
            EntryUpdate::Rename {
                file_id,
                new_parent_id,
                new_name,
            } => entries
                .rename(identity, volume_id, file_id, new_parent_id, new_name)
                .await
                .map(UpdateOutcome::Ok),
            EntryUpdate::SetXattr {
                file_id,
                name,
                value,
                mode,
            } => entries
                .set_xattr(identity, volume_id, file_id, &name, value, mode)
                .await
                .map(|()| UpdateOutcome::XattrChanged(file_id)),
            EntryUpdate::RemoveXattr { file_id, name } => entries
                .remove_xattr(identity, volume_id, file_id, &name)
                .await
                .map(|()| UpdateOutcome::XattrChanged(file_id)),
        };
        match outcome {
            Ok(outcome) => results.push(outcome),
            Err(Error::Rejected(code)) => results.push(UpdateOutcome::Err(code)),
            Err(e) => return Err(e),
        }
    }

    tracing::debug!(
        volume_id,
        gateway_id = gateway.id(),
        count = results.len(),
        "applied metadata updates"
    );

    UpdateReply {
        volume_id,
        versions: volume_versions(volume),
        results,
        signature: Vec::new(),
    }
    .signed_with(&volume.signing_key)
    .map_err(Error::signing)
}
