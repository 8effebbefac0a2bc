//! Computes the stream set that should represent "self" in a room.

use crate::stream::StreamDescriptor;

/// Reconciles the previous self-stream set against a newly published (or just
/// stopped) stream and the set of publishers known to be alive.
///
/// A stopped stream is passed as `None` and is simply absent from the output.
/// A new stream replaces every previous entry that is the same logical
/// stream: same URI, same canonical transport-stream id, or same
/// URI-without-query, provided the type also matches. Entries whose canonical
/// id no longer belongs to a live or externally-registered publisher are
/// dropped as stale; streams without a parseable id are remote and kept.
///
/// Pure function: no I/O, inputs untouched.
pub fn reconcile_self_streams(
    previous: &[StreamDescriptor],
    new_stream: Option<&StreamDescriptor>,
    known_publisher_ids: &[String],
    external_publisher_uris: &[String],
) -> Vec<StreamDescriptor> {
    let mut streams: Vec<StreamDescriptor> = previous.to_vec();

    if let Some(new_stream) = new_stream {
        let new_stream_id = new_stream.stream_id();

        streams.retain(|stream| {
            let has_same_uri = stream.uri == new_stream.uri;
            let has_same_stream_id =
                stream.stream_id().is_some() && stream.stream_id() == new_stream_id;
            let same_without_query = stream.bare_uri() == new_stream.bare_uri();
            let has_same_type = stream.stream_type == new_stream.stream_type;

            !((has_same_uri || has_same_stream_id || same_without_query) && has_same_type)
        });

        streams.push(new_stream.clone());
    }

    streams.retain(|stream| {
        // The just-appended stream is never stale.
        if new_stream.is_some_and(|new| new.uri == stream.uri) {
            return true;
        }

        match stream.stream_id() {
            None => true,
            Some(stream_id) => {
                known_publisher_ids.contains(&stream_id)
                    || external_publisher_uris
                        .iter()
                        .any(|uri| uri == stream.bare_uri())
            }
        }
    });

    streams
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamType;

    fn stream(uri: &str, stream_type: StreamType) -> StreamDescriptor {
        StreamDescriptor::new(uri, stream_type)
    }

    #[test]
    fn stopped_stream_is_absent_and_output_never_grows() {
        let previous = vec![
            stream("cast://a?streamToken=t", StreamType::User),
            stream("https://example.com/feed", StreamType::User),
        ];

        let result = reconcile_self_streams(&previous, None, &["a".to_string()], &[]);

        assert_eq!(result.len(), 2);
        assert!(result.len() <= previous.len());

        let result = reconcile_self_streams(&previous, None, &[], &[]);
        // The stale "a" entry goes, the remote URL stream stays.
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].uri, "https://example.com/feed");
    }

    #[test]
    fn republishing_replaces_the_same_logical_stream() {
        let previous = vec![stream("cast://a?streamToken=old", StreamType::User)];
        let new = stream("cast://a?streamToken=new", StreamType::User);

        let result =
            reconcile_self_streams(&previous, Some(&new), &["a".to_string()], &[]);

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].uri, "cast://a?streamToken=new");
    }

    #[test]
    fn same_id_with_different_type_is_kept() {
        let previous = vec![stream("cast://a", StreamType::Screen)];
        let new = stream("cast://a?x=1", StreamType::User);

        let result =
            reconcile_self_streams(&previous, Some(&new), &["a".to_string()], &[]);

        // Screen share and camera stream of the same publisher coexist.
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn at_most_one_entry_per_id_and_type_and_new_stream_always_present() {
        let previous = vec![
            stream("cast://a?streamToken=1", StreamType::User),
            stream("cast://a?streamToken=2", StreamType::User),
            stream("cast://b", StreamType::User),
        ];
        let new = stream("cast://a?streamToken=3", StreamType::User);

        let result = reconcile_self_streams(
            &previous,
            Some(&new),
            &["a".to_string(), "b".to_string()],
            &[],
        );

        let a_user_entries = result
            .iter()
            .filter(|s| s.stream_id().as_deref() == Some("a") && s.stream_type == StreamType::User)
            .count();
        assert_eq!(a_user_entries, 1);
        assert!(result.iter().any(|s| s.uri == new.uri));
    }

    #[test]
    fn externally_registered_uris_survive_the_staleness_filter() {
        let previous = vec![stream("cast://ext-1?streamToken=t", StreamType::User)];
        let new = stream("cast://mine", StreamType::Screen);

        let result = reconcile_self_streams(
            &previous,
            Some(&new),
            &["mine".to_string()],
            &["cast://ext-1".to_string()],
        );

        assert_eq!(result.len(), 2);
    }

    #[test]
    fn inputs_are_not_mutated() {
        let previous = vec![stream("cast://a", StreamType::User)];
        let snapshot = previous.clone();

        let _ = reconcile_self_streams(&previous, None, &[], &[]);

        assert_eq!(previous, snapshot);
    }
}
