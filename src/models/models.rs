use serde::{Deserialize, Serialize};

// === Stored documents ===

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub profile_picture: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    /// Owned posts, in creation order.
    #[serde(default)]
    pub posts: Vec<String>,
    #[serde(default)]
    pub bookmarks: Vec<String>,
    #[serde(default)]
    pub followers: Vec<String>,
    #[serde(default)]
    pub following: Vec<String>,
    pub created_at: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    #[serde(default)]
    pub caption: Option<String>,
    pub image: String,
    pub author: String,
    #[serde(default)]
    pub likes: Vec<String>,
    #[serde(default)]
    pub comments: Vec<String>,
    pub created_at: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub text: String,
    pub author: String,
    pub post: String,
    pub created_at: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    /// Sorted pair, so the document reads the same from either side.
    pub participants: [String; 2],
    #[serde(default)]
    pub messages: Vec<String>,
    pub created_at: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub message: String,
    pub created_at: String,
}

/// Session credential payload.
#[derive(Serialize, Deserialize, Debug)]
pub struct Claims {
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
}

// === Projections ===

/// A user as clients see it: everything but the password hash.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub profile_picture: Option<String>,
    pub bio: Option<String>,
    pub gender: Option<String>,
    pub posts: Vec<String>,
    pub bookmarks: Vec<String>,
    pub followers: Vec<String>,
    pub following: Vec<String>,
    pub created_at: String,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            profile_picture: user.profile_picture,
            bio: user.bio,
            gender: user.gender,
            posts: user.posts,
            bookmarks: user.bookmarks,
            followers: user.followers,
            following: user.following,
            created_at: user.created_at,
        }
    }
}

/// Author fields embedded in feeds and comment threads.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorSummary {
    pub id: String,
    pub username: String,
    pub profile_picture: Option<String>,
}

impl From<User> for AuthorSummary {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            profile_picture: user.profile_picture,
        }
    }
}

/// Login response: the public user with `posts` resolved to documents.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub profile_picture: Option<String>,
    pub bio: Option<String>,
    pub gender: Option<String>,
    pub followers: Vec<String>,
    pub following: Vec<String>,
    pub bookmarks: Vec<String>,
    pub posts: Vec<Post>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub id: String,
    pub text: String,
    pub author: AuthorSummary,
    pub post: String,
    pub created_at: String,
}

/// A post with its author joined in as `A` and its comment thread resolved.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostView<A = AuthorSummary> {
    pub id: String,
    pub caption: Option<String>,
    pub image: String,
    pub author: A,
    pub likes: Vec<String>,
    pub comments: Vec<CommentView>,
    pub created_at: String,
}

// === Requests ===

#[derive(Deserialize, Debug, Default)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct CommentRequest {
    #[serde(default)]
    pub text: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct MessageRequest {
    #[serde(default)]
    pub message: String,
}

/// Partial profile edit; `None` leaves a field untouched.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub bio: Option<String>,
    pub gender: Option<String>,
    #[serde(skip)]
    pub profile_picture: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct NewPost {
    pub caption: Option<String>,
    pub image: Option<Vec<u8>>,
}

// === Outcomes ===

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FollowOutcome {
    Followed,
    Unfollowed,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookmarkOutcome {
    Saved,
    Unsaved,
}
