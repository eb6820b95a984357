use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::db::CategoryStore;
use crate::error::AppError;
use crate::middleware::require_staff;
use crate::models::CategoryModel;
use crate::proto::categories::categories_service_server::CategoriesService;
use crate::proto::categories::{
    Category, CategoryRes, CreateCategoryReq, DeleteCategoryReq, GetCategoryReq,
    ListCategoriesRes,
};
use crate::proto::common::Empty;

pub struct CategoriesServiceImpl {
    store: Arc<dyn CategoryStore>,
}

impl CategoriesServiceImpl {
    pub fn new(store: Arc<dyn CategoryStore>) -> Self {
        Self { store }
    }

    fn model_to_proto(model: &CategoryModel) -> Category {
        Category {
            id: model.id,
            name: model.name.clone(),
        }
    }
}

#[tonic::async_trait]
impl CategoriesService for CategoriesServiceImpl {
    async fn list_categories(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<ListCategoriesRes>, Status> {
        let categories = self
            .store
            .list_categories()
            .await?
            .iter()
            .map(Self::model_to_proto)
            .collect();
        Ok(Response::new(ListCategoriesRes { categories }))
    }

    async fn get_category(
        &self,
        request: Request<GetCategoryReq>,
    ) -> Result<Response<CategoryRes>, Status> {
        let req = request.into_inner();
        let model = self.store.get_category(req.id).await?;
        Ok(Response::new(CategoryRes {
            category: Some(Self::model_to_proto(&model)),
        }))
    }

    async fn create_category(
        &self,
        request: Request<CreateCategoryReq>,
    ) -> Result<Response<CategoryRes>, Status> {
        require_staff(&request)?;
        let req = request.into_inner();

        let name = req.name.trim();
        if name.is_empty() {
            return Err(AppError::MissingParameter("name").into());
        }
        if name.chars().count() > 255 {
            return Err(Status::invalid_argument("name must be at most 255 characters"));
        }

        let model = self.store.create_category(name).await?;
        tracing::info!("Created category id={} name={}", model.id, model.name);
        Ok(Response::new(CategoryRes {
            category: Some(Self::model_to_proto(&model)),
        }))
    }

    async fn delete_category(
        &self,
        request: Request<DeleteCategoryReq>,
    ) -> Result<Response<Empty>, Status> {
        require_staff(&request)?;
        let req = request.into_inner();

        self.store.delete_category(req.id).await?;
        tracing::info!("Deleted category id={}", req.id);
        Ok(Response::new(Empty {}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::middleware::AuthenticatedUser;
    use tonic::Code;

    fn staff<T>(message: T) -> Request<T> {
        let mut request = Request::new(message);
        request.extensions_mut().insert(AuthenticatedUser {
            user_id: 1,
            email: "staff@example.com".to_string(),
            is_staff: true,
        });
        request
    }

    #[tokio::test]
    async fn test_create_list_and_delete() {
        let service = CategoriesServiceImpl::new(Arc::new(MemoryStore::new()));

        for name in ["Keys", "Bags"] {
            service
                .create_category(staff(CreateCategoryReq {
                    name: name.to_string(),
                }))
                .await
                .unwrap();
        }

        let listed = service
            .list_categories(Request::new(Empty {}))
            .await
            .unwrap()
            .into_inner()
            .categories;
        let names: Vec<&str> = listed.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Bags", "Keys"]);

        let bags_id = listed[0].id;
        service
            .delete_category(staff(DeleteCategoryReq { id: bags_id }))
            .await
            .unwrap();
        let status = service
            .get_category(Request::new(GetCategoryReq { id: bags_id }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn test_mutations_require_staff() {
        let service = CategoriesServiceImpl::new(Arc::new(MemoryStore::new()));
        let status = service
            .create_category(Request::new(CreateCategoryReq {
                name: "Bags".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unauthenticated);

        let status = service
            .create_category(staff(CreateCategoryReq {
                name: "   ".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }
}
