use log::info;
use mongodb::{
    bson::{doc, Document},
    options::{ClientOptions, IndexOptions},
    Client, Collection, Database, IndexModel,
};

use crate::models::{
    item::{Image, Item},
    message::Message,
    notification::Notification,
    publication::Publication,
    user::User,
    IMAGES, ITEMS, MESSAGES, NOTIFICATIONS, PUBLICATIONS, USERS,
};

pub struct MongoDB {
    pub client: Client,
    pub db: Database,
}

impl MongoDB {
    /// Builds the client. No connection is made until the first operation.
    pub async fn init(uri: &str, db_name: &str) -> mongodb::error::Result<Self> {
        let mut client_options = ClientOptions::parse(uri).await?;
        client_options.app_name = Some("finder-api".to_string());
        let client = Client::with_options(client_options)?;
        let db = client.database(db_name);
        Ok(MongoDB { client, db })
    }

    pub async fn ping(&self) -> mongodb::error::Result<()> {
        self.db.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    pub fn users(&self) -> Collection<User> {
        self.db.collection(USERS)
    }

    pub fn items(&self) -> Collection<Item> {
        self.db.collection(ITEMS)
    }

    pub fn images(&self) -> Collection<Image> {
        self.db.collection(IMAGES)
    }

    pub fn publications(&self) -> Collection<Publication> {
        self.db.collection(PUBLICATIONS)
    }

    pub fn messages(&self) -> Collection<Message> {
        self.db.collection(MESSAGES)
    }

    pub fn notifications(&self) -> Collection<Notification> {
        self.db.collection(NOTIFICATIONS)
    }

    /// Creates the indexes the queries and uniqueness rules depend on.
    pub async fn ensure_indexes(&self) -> mongodb::error::Result<()> {
        let users = self.users();
        for field in ["username", "email", "phone"] {
            users.create_index(unique(field)).await?;
        }
        users.create_index(plain(doc! { "location": "2dsphere" })).await?;

        self.publications()
            .create_index(plain(doc! { "geoLocation": "2dsphere" }))
            .await?;
        self.publications()
            .create_index(plain(doc! { "user": 1, "createdAt": -1 }))
            .await?;
        self.images().create_index(plain(doc! { "item": 1 })).await?;
        self.messages()
            .create_index(plain(doc! { "sender": 1, "receiver": 1, "timestamp": -1 }))
            .await?;
        self.notifications()
            .create_index(plain(doc! { "userId": 1, "createdAt": -1 }))
            .await?;

        info!("MongoDB indexes ensured");
        Ok(())
    }
}

fn unique(field: &str) -> IndexModel {
    IndexModel::builder()
        .keys(doc! { field: 1 })
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

fn plain(keys: Document) -> IndexModel {
    IndexModel::builder().keys(keys).build()
}
