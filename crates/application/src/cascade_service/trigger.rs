use super::*;

/// Decides whether a parent change should cascade for one related configuration.
///
/// Without trigger mappings every update cascades. Otherwise at least one
/// trigger field present in the post-change snapshot must be new or changed.
#[must_use]
pub fn should_cascade(related: &RelatedEntityConfig, post: &Record, pre: Option<&Record>) -> bool {
    let trigger_fields = related.trigger_fields();
    if trigger_fields.is_empty() {
        return true;
    }

    trigger_fields.into_iter().any(|field| {
        let Some(post_value) = post.field(field) else {
            return false;
        };

        match pre.and_then(|pre| pre.field(field)) {
            Some(pre_value) => !post_value.same_value(pre_value),
            None => true,
        }
    })
}
