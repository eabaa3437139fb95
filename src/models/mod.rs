//! Record types harvested from the feed
//!
//! - `Post`: keyed by its shortcode, immutable apart from engagement counters
//! - `User`: keyed by username, either minimal (seen as an author) or enriched
//! - `Comment`: keyed by comment id, owned by a post

mod comment;
mod post;
mod user;

pub use comment::Comment;
pub use post::{extract_hashtags, word_count, Author, Location, MediaType, Post, PostNeedingComments};
pub use user::User;
