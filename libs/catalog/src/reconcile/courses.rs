//! Course association reconciliation, keyed by course id

use tracing::debug;

use super::plan;
use crate::error::StoreResult;
use crate::store::StoreTransaction;

/// Make the video's course links equal `course_ids`.
///
/// Links carry no fields besides their key, so a matched course is never
/// rewritten.
pub async fn apply_courses(
    tx: &mut dyn StoreTransaction,
    video_id: i64,
    course_ids: Vec<String>,
) -> StoreResult<()> {
    let persisted = tx.courses(video_id).await?;
    let plan = plan(
        persisted,
        course_ids,
        |row| row.course_id.clone(),
        |course_id| course_id.clone(),
        |_, _| true,
    );

    debug!(
        "Reconciling courses for video [{}]: {} linked, {} unlinked, {} kept",
        video_id,
        plan.inserts.len(),
        plan.deletes.len(),
        plan.unchanged
    );
    if plan.is_noop() {
        return Ok(());
    }

    if !plan.deletes.is_empty() {
        let ids: Vec<i64> = plan.deletes.iter().map(|row| row.id).collect();
        tx.delete_courses(&ids).await?;
    }
    for course_id in &plan.inserts {
        tx.insert_course(video_id, course_id).await?;
    }
    Ok(())
}
