//! Member selection for high-availability token composition.

use crate::room::models::Member;

/// Members publishing the same content as the local one: same screen name,
/// different session. Used to let one viewer token cover every replica of a
/// channel's content.
pub fn similar_members<'a>(
    screen_name: &str,
    self_session_id: &str,
    members: &'a [Member],
) -> Vec<&'a Member> {
    members
        .iter()
        .filter(|member| {
            member.screen_name == screen_name && member.session_id != self_session_id
        })
        .collect()
}

/// Primary-stream ids of the given members, skipping members whose first
/// stream has no parseable transport-stream id.
pub fn valid_stream_ids(members: &[&Member]) -> Vec<String> {
    members
        .iter()
        .filter_map(|member| member.streams.first())
        .filter_map(|stream| stream.stream_id())
        .collect()
}
