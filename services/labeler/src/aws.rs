use crate::config::AwsConfig;
use crate::label_detector::RekognitionLabelService;
use crate::pipeline::Clients;
use crate::result_store::DynamoTableStore;
use crate::s3_uploader::S3ObjectStore;
use aws_config::BehaviorVersion;
use std::sync::Arc;
use tracing::info;

/// AWS-backed collaborators built from one shared SDK configuration
pub struct AwsClients {
    pub object_store: S3ObjectStore,
    pub label_service: RekognitionLabelService,
    pub table_store: DynamoTableStore,
}

impl AwsClients {
    /// Load credentials and region, then build S3, Rekognition and DynamoDB
    /// clients. No request is sent here.
    pub async fn load(config: &AwsConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        // Custom endpoint for LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }

        let sdk_config = loader.load().await;

        let object_store = S3ObjectStore::from_sdk_config(&sdk_config, config);
        let label_service =
            RekognitionLabelService::new(aws_sdk_rekognition::Client::new(&sdk_config));
        let table_store = DynamoTableStore::new(aws_sdk_dynamodb::Client::new(&sdk_config));

        info!(
            region = %config.region,
            endpoint = config.endpoint_url.as_deref().unwrap_or("default"),
            "AWS clients initialized"
        );

        Self {
            object_store,
            label_service,
            table_store,
        }
    }

    pub fn into_clients(self) -> Clients {
        Clients {
            object_store: Arc::new(self.object_store),
            label_service: Arc::new(self.label_service),
            table_store: Arc::new(self.table_store),
        }
    }
}
