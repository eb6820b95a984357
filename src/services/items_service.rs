use std::sync::Arc;

use chrono::NaiveDate;
use tonic::{Request, Response, Status};

use crate::catalog::Catalog;
use crate::error::AppError;
use crate::middleware::require_staff;
use crate::models::{ItemFields, ItemFilter, ItemModel};
use crate::proto::common::Empty;
use crate::proto::items::items_service_server::ItemsService;
use crate::proto::items::{
    CreateItemReq, DeleteItemReq, GetItemReq, Item, ItemRes, ListItemsReq, ListItemsRes,
    UpdateItemReq, UpdateItemStatusReq,
};

pub struct ItemsServiceImpl {
    catalog: Arc<Catalog>,
}

impl ItemsServiceImpl {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    fn model_to_proto(model: &ItemModel) -> Item {
        Item {
            id: model.id,
            code: model.code.clone(),
            title: model.title.clone(),
            category: model.category_name.clone().unwrap_or_default(),
            category_id: model.category_id,
            description: model.description.clone(),
            photo: model.photo.clone().unwrap_or_default(),
            status: model.status.as_str().to_string(),
            found_on: model.found_on.format("%Y-%m-%d").to_string(),
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
        }
    }

    fn parse_found_on(value: &str) -> Result<NaiveDate, Status> {
        if value.is_empty() {
            return Err(AppError::MissingParameter("found_on").into());
        }
        NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
            Status::invalid_argument(format!("found_on must be YYYY-MM-DD, got \"{}\"", value))
        })
    }

    fn non_empty(value: String) -> Option<String> {
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }
}

#[tonic::async_trait]
impl ItemsService for ItemsServiceImpl {
    async fn list_items(
        &self,
        request: Request<ListItemsReq>,
    ) -> Result<Response<ListItemsRes>, Status> {
        let req = request.into_inner();

        let filter = ItemFilter {
            code: Self::non_empty(req.code),
            search: Self::non_empty(req.search.trim().to_string()),
        };

        let models = self.catalog.list_items(&filter).await?;
        let items: Vec<Item> = models.iter().map(Self::model_to_proto).collect();
        Ok(Response::new(ListItemsRes { items }))
    }

    async fn get_item(&self, request: Request<GetItemReq>) -> Result<Response<ItemRes>, Status> {
        let req = request.into_inner();

        let model = self.catalog.get_item(req.id).await?;
        Ok(Response::new(ItemRes {
            item: Some(Self::model_to_proto(&model)),
        }))
    }

    async fn update_item_status(
        &self,
        request: Request<UpdateItemStatusReq>,
    ) -> Result<Response<ItemRes>, Status> {
        let req = request.into_inner();

        let model = self.catalog.update_status(&req.code, &req.status).await?;
        Ok(Response::new(ItemRes {
            item: Some(Self::model_to_proto(&model)),
        }))
    }

    async fn create_item(
        &self,
        request: Request<CreateItemReq>,
    ) -> Result<Response<ItemRes>, Status> {
        let user = require_staff(&request)?;
        let req = request.into_inner();

        let fields = ItemFields {
            title: req.title,
            category_id: req.category_id,
            description: req.description,
            photo: Self::non_empty(req.photo),
            found_on: Self::parse_found_on(&req.found_on)?,
        };

        let model = self.catalog.create_item(fields).await?;
        tracing::info!("Item {} registered by {}", model.code, user.email);

        Ok(Response::new(ItemRes {
            item: Some(Self::model_to_proto(&model)),
        }))
    }

    async fn update_item(
        &self,
        request: Request<UpdateItemReq>,
    ) -> Result<Response<ItemRes>, Status> {
        require_staff(&request)?;
        let req = request.into_inner();

        let fields = ItemFields {
            title: req.title,
            category_id: req.category_id,
            description: req.description,
            photo: Self::non_empty(req.photo),
            found_on: Self::parse_found_on(&req.found_on)?,
        };
        let status = Self::non_empty(req.status);

        let model = self
            .catalog
            .update_item(req.id, fields, status.as_deref())
            .await?;
        Ok(Response::new(ItemRes {
            item: Some(Self::model_to_proto(&model)),
        }))
    }

    async fn delete_item(
        &self,
        request: Request<DeleteItemReq>,
    ) -> Result<Response<Empty>, Status> {
        require_staff(&request)?;
        let req = request.into_inner();

        self.catalog.delete_item(req.id).await?;
        Ok(Response::new(Empty {}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CodeGenerator;
    use crate::db::{CategoryStore, MemoryStore};
    use crate::middleware::AuthenticatedUser;
    use tonic::Code;

    fn service() -> (ItemsServiceImpl, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let catalog = Catalog::new(store.clone(), CodeGenerator::seeded(17));
        (ItemsServiceImpl::new(Arc::new(catalog)), store)
    }

    fn as_user<T>(message: T, is_staff: bool) -> Request<T> {
        let mut request = Request::new(message);
        request.extensions_mut().insert(AuthenticatedUser {
            user_id: 1,
            email: "someone@example.com".to_string(),
            is_staff,
        });
        request
    }

    fn create_req(title: &str, category_id: Option<i64>) -> CreateItemReq {
        CreateItemReq {
            title: title.to_string(),
            category_id,
            description: format!("{} found at the front desk", title),
            photo: String::new(),
            found_on: "2024-06-01".to_string(),
        }
    }

    async fn create(service: &ItemsServiceImpl, title: &str) -> Item {
        service
            .create_item(as_user(create_req(title, None), true))
            .await
            .unwrap()
            .into_inner()
            .item
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_requires_staff() {
        let (service, _) = service();

        let status = service
            .create_item(Request::new(create_req("Wallet", None)))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unauthenticated);

        let status = service
            .create_item(as_user(create_req("Wallet", None), false))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::PermissionDenied);
    }

    #[tokio::test]
    async fn test_create_item_returns_generated_code() {
        let (service, store) = service();
        let bags = store.create_category("Bags").await.unwrap();

        let item = service
            .create_item(as_user(create_req("Purse", Some(bags.id)), true))
            .await
            .unwrap()
            .into_inner()
            .item
            .unwrap();

        assert_eq!(item.code.len(), 8);
        assert_eq!(item.status, "DISPONIVEL");
        assert_eq!(item.category, "Bags");
        assert_eq!(item.category_id, Some(bags.id));
        assert_eq!(item.found_on, "2024-06-01");
        assert_eq!(item.photo, "");
    }

    #[tokio::test]
    async fn test_create_item_validates_date() {
        let (service, _) = service();
        let mut req = create_req("Cap", None);
        req.found_on = "01/06/2024".to_string();
        let status = service.create_item(as_user(req, true)).await.unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);

        let mut req = create_req("Cap", None);
        req.found_on = String::new();
        let status = service.create_item(as_user(req, true)).await.unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_update_status_is_public() {
        let (service, _) = service();
        let item = create(&service, "Headphones").await;

        let updated = service
            .update_item_status(Request::new(UpdateItemStatusReq {
                code: item.code.clone(),
                status: "RESGATADO".to_string(),
            }))
            .await
            .unwrap()
            .into_inner()
            .item
            .unwrap();
        assert_eq!(updated.status, "RESGATADO");
        assert_eq!(updated.code, item.code);
        assert_eq!(updated.title, item.title);
    }

    #[tokio::test]
    async fn test_update_status_error_codes() {
        let (service, _) = service();
        let item = create(&service, "Charger").await;

        let status = service
            .update_item_status(Request::new(UpdateItemStatusReq {
                code: String::new(),
                status: "RESGATADO".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);

        let status = service
            .update_item_status(Request::new(UpdateItemStatusReq {
                code: "NOPE1234".to_string(),
                status: "RESGATADO".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);

        let status = service
            .update_item_status(Request::new(UpdateItemStatusReq {
                code: item.code,
                status: "FOO".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert!(status.message().contains("DISPONIVEL, RESGATADO"));
    }

    #[tokio::test]
    async fn test_list_items_filters() {
        let (service, _) = service();
        let umbrella = create(&service, "Umbrella").await;
        create(&service, "Notebook").await;

        let all = service
            .list_items(Request::new(ListItemsReq::default()))
            .await
            .unwrap()
            .into_inner()
            .items;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].title, "Notebook");

        let by_code = service
            .list_items(Request::new(ListItemsReq {
                code: umbrella.code.clone(),
                search: String::new(),
            }))
            .await
            .unwrap()
            .into_inner()
            .items;
        assert_eq!(by_code.len(), 1);
        assert_eq!(by_code[0].id, umbrella.id);

        let by_search = service
            .list_items(Request::new(ListItemsReq {
                code: String::new(),
                search: " front DESK ".to_string(),
            }))
            .await
            .unwrap()
            .into_inner()
            .items;
        assert_eq!(by_search.len(), 2);
    }

    #[tokio::test]
    async fn test_update_and_delete_item() {
        let (service, _) = service();
        let item = create(&service, "Scarf").await;

        let updated = service
            .update_item(as_user(
                UpdateItemReq {
                    id: item.id,
                    title: "Green scarf".to_string(),
                    category_id: None,
                    description: "Wool".to_string(),
                    photo: "items/scarf.jpg".to_string(),
                    found_on: "2024-06-02".to_string(),
                    status: String::new(),
                },
                true,
            ))
            .await
            .unwrap()
            .into_inner()
            .item
            .unwrap();
        assert_eq!(updated.code, item.code);
        assert_eq!(updated.title, "Green scarf");
        assert_eq!(updated.photo, "items/scarf.jpg");
        assert_eq!(updated.status, "DISPONIVEL");

        let status = service
            .delete_item(as_user(DeleteItemReq { id: item.id }, false))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::PermissionDenied);

        service
            .delete_item(as_user(DeleteItemReq { id: item.id }, true))
            .await
            .unwrap();
        let status = service
            .get_item(Request::new(GetItemReq { id: item.id }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
    }
}
