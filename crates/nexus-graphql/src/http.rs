use std::sync::Arc;

use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use nexus_messages::{Attachment, NewChannelMessage, PageRequest};
use nexus_types::api::{
    CREATE_TEXT_CHANNEL_MESSAGE, CreateTextChannelMessageData, CreateTextChannelMessageVariables,
    FETCH_USER, FetchUserData, FetchUserVariables, GET_TEXT_CHANNEL_MESSAGES, GraphQlRequest,
    GraphQlResponse, Operation, TextChannelMessagesData, TextChannelMessagesVariables,
};
use nexus_types::{ChannelMessage, User};

use crate::config::ClientConfig;
use crate::error::GraphQlError;

/// Error bodies longer than this are cut before being logged or returned.
const MAX_ERROR_BODY: usize = 512;

/// GraphQL-over-HTTP client. Cheap to clone.
#[derive(Clone)]
pub struct GraphQlClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
}

impl GraphQlClient {
    pub fn new(config: ClientConfig) -> Result<Self, GraphQlError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run one operation as a JSON POST.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        operation: &Operation,
        variables: impl Serialize,
    ) -> Result<T, GraphQlError> {
        let request = GraphQlRequest::new(operation, variables)?;
        let builder = self.http.post(&self.config.http_url).json(&request);
        self.send(builder, operation).await
    }

    /// Run one operation as a multipart request carrying `files`, each bound
    /// to `variables.<list_var>.<index>`.
    pub async fn execute_with_uploads<T: DeserializeOwned>(
        &self,
        operation: &Operation,
        variables: impl Serialize,
        list_var: &str,
        files: &[Attachment],
    ) -> Result<T, GraphQlError> {
        let request = GraphQlRequest::new(operation, variables)?;

        let mut form = Form::new()
            .text("operations", serde_json::to_string(&request)?)
            .text("map", upload_map(list_var, files.len()).to_string());
        for (index, file) in files.iter().enumerate() {
            let mut part = Part::bytes(file.bytes.clone()).file_name(file.file_name.clone());
            if let Some(content_type) = &file.content_type {
                part = part.mime_str(content_type)?;
            }
            form = form.part(index.to_string(), part);
        }

        // Apollo's CSRF guard rejects multipart requests without this header
        let builder = self
            .http
            .post(&self.config.http_url)
            .header("x-apollo-operation-name", operation.name)
            .multipart(form);
        self.send(builder, operation).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        mut builder: reqwest::RequestBuilder,
        operation: &Operation,
    ) -> Result<T, GraphQlError> {
        if let Some(bearer) = self.config.bearer() {
            builder = builder.header(AUTHORIZATION, bearer);
        }

        debug!("GraphQL {}", operation.name);
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        decode_response(status, &body, operation.name)
    }

    // -- Operations --

    pub async fn text_channel_messages(
        &self,
        request: &PageRequest,
    ) -> Result<Vec<ChannelMessage>, GraphQlError> {
        let variables = TextChannelMessagesVariables {
            channel_id: request.channel_id.clone(),
            offset: request.offset,
            limit: request.limit,
            refresh_trigger: request.refresh_trigger,
        };
        let data: TextChannelMessagesData =
            self.execute(&GET_TEXT_CHANNEL_MESSAGES, variables).await?;
        page_from_data(data)
    }

    pub async fn fetch_user(&self, user_id: &str) -> Result<User, GraphQlError> {
        let variables = FetchUserVariables {
            user_id: user_id.to_string(),
        };
        let data: FetchUserData = self.execute(&FETCH_USER, variables).await?;
        data.fetch_user.ok_or(GraphQlError::MissingData(FETCH_USER.name))
    }

    pub async fn create_text_channel_message(
        &self,
        message: &NewChannelMessage,
    ) -> Result<(), GraphQlError> {
        let variables = CreateTextChannelMessageVariables {
            id: message.id.clone(),
            posted_by_user_id: message.posted_by_user_id.clone(),
            channel_id: message.channel_id.clone(),
            content: message.content.clone(),
            attachments: vec![Value::Null; message.attachments.len()],
        };

        let data: CreateTextChannelMessageData = if message.attachments.is_empty() {
            self.execute(&CREATE_TEXT_CHANNEL_MESSAGE, variables).await?
        } else {
            self.execute_with_uploads(
                &CREATE_TEXT_CHANNEL_MESSAGE,
                variables,
                "attachments",
                &message.attachments,
            )
            .await?
        };

        data.create_text_channel_message
            .map(|_| ())
            .ok_or(GraphQlError::MissingData(CREATE_TEXT_CHANNEL_MESSAGE.name))
    }
}

/// The page without its null items.
pub(crate) fn page_from_data(data: TextChannelMessagesData) -> Result<Vec<ChannelMessage>, GraphQlError> {
    let items = data
        .get_text_channel_messages
        .ok_or(GraphQlError::MissingData(GET_TEXT_CHANNEL_MESSAGES.name))?;
    let total = items.len();
    let page: Vec<ChannelMessage> = items.into_iter().flatten().collect();
    if page.len() < total {
        warn!("Dropped {} null messages from page", total - page.len());
    }
    Ok(page)
}

/// `{"0": ["variables.<list_var>.0"], "1": [...], ...}`
pub(crate) fn upload_map(list_var: &str, count: usize) -> Value {
    let entries: serde_json::Map<String, Value> = (0..count)
        .map(|i| (i.to_string(), json!([format!("variables.{}.{}", list_var, i)])))
        .collect();
    Value::Object(entries)
}

/// Turn a raw HTTP answer into the operation's `data`. GraphQL errors win
/// over the status code, since servers report them under 200 and 400 alike.
pub(crate) fn decode_response<T: DeserializeOwned>(
    status: u16,
    body: &str,
    operation: &'static str,
) -> Result<T, GraphQlError> {
    let parsed = serde_json::from_str::<GraphQlResponse<T>>(body);

    if !(200..300).contains(&status) {
        return match parsed {
            Ok(response) if !response.errors.is_empty() => Err(GraphQlError::Graphql(response.errors)),
            _ => {
                warn!("{} failed with HTTP {}", operation, status);
                Err(GraphQlError::Status {
                    status,
                    body: truncate(body, MAX_ERROR_BODY),
                })
            }
        };
    }

    let response = parsed?;
    if !response.errors.is_empty() {
        return Err(GraphQlError::Graphql(response.errors));
    }
    response.data.ok_or(GraphQlError::MissingData(operation))
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}
