//! Field-expansion parameters sent with every stream and lookup request.
//!
//! The stream only carries what is asked for here; anything the router reads
//! (entities, media variants, author handle) must be listed.

pub const TWEET_FIELDS: &str = "attachments,author_id,conversation_id,created_at,entities,note_tweet,possibly_sensitive,referenced_tweets";

pub const EXPANSIONS: &str = "author_id,attachments.media_keys";

pub const MEDIA_FIELDS: &str = "alt_text,type,url,variants";

pub const USER_FIELDS: &str = "name,username";

/// Query pairs shared by the stream and conversation lookup endpoints.
pub const EXPANSION_QUERY: [(&str, &str); 4] = [
    ("tweet.fields", TWEET_FIELDS),
    ("expansions", EXPANSIONS),
    ("media.fields", MEDIA_FIELDS),
    ("user.fields", USER_FIELDS),
];

/// Page size for conversation lookups (the endpoint maximum).
pub const CONVERSATION_PAGE_SIZE: &str = "100";
